//! Declarative YAML checkout scenarios

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{E2eError, E2eResult};
use crate::fixtures::{CustomerData, FixtureCatalog, PaymentMethod, Product};

/// One purchase to run on every selected device project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Product fixture key
    #[serde(default = "default_product")]
    pub product: String,

    /// Customer fixture key
    #[serde(default = "default_customer")]
    pub customer: String,

    /// Payment method fixture key
    pub payment: String,

    /// Which OTP code set to enter when the payment asks for one
    #[serde(default)]
    pub otp: OtpChoice,

    /// Device projects to run on; empty means every configured project
    #[serde(default)]
    pub devices: Vec<String>,
}

fn default_product() -> String {
    "mobile_legends".to_string()
}

fn default_customer() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpChoice {
    #[default]
    Valid,
    Invalid,
}

/// Scenario with its fixture references resolved
#[derive(Debug, Clone)]
pub struct ResolvedScenario {
    pub name: String,
    pub product: Product,
    pub customer: CustomerData,
    pub payment: PaymentMethod,
    pub otp: Vec<String>,
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        if scenario.name.trim().is_empty() {
            return Err(E2eError::SpecParse("scenario name must not be empty".to_string()));
        }
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, sorted by name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(dup) = scenarios.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(E2eError::SpecParse(format!("duplicate scenario name: {}", dup[0].name)));
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Whether this scenario runs on the named device project
    pub fn runs_on(&self, device: &str) -> bool {
        self.devices.is_empty() || self.devices.iter().any(|d| d == device)
    }

    /// Look up every fixture this scenario names
    pub fn resolve(&self, catalog: &FixtureCatalog) -> E2eResult<ResolvedScenario> {
        let otp = match self.otp {
            OtpChoice::Valid => catalog.otp.valid.clone(),
            OtpChoice::Invalid => catalog.otp.invalid.clone(),
        };
        Ok(ResolvedScenario {
            name: self.name.clone(),
            product: catalog.product(&self.product)?.clone(),
            customer: catalog.customer(&self.customer)?.clone(),
            payment: catalog.payment(&self.payment)?.clone(),
            otp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_scenario() {
        let yaml = r#"
name: ml-ximpaysf
payment: ximpaysf
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.product, "mobile_legends");
        assert_eq!(scenario.customer, "default");
        assert_eq!(scenario.otp, OtpChoice::Valid);
        assert!(scenario.runs_on("mobile-chromium"));
    }

    #[test]
    fn test_parse_full_scenario() {
        let yaml = r#"
name: ml-qris-desktop
description: QRIS purchase settled through the Xendit simulator
tags: [smoke, qris]
customer: alternative
payment: xendit_qris
otp: invalid
devices: [desktop-chromium]
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert!(scenario.runs_on("desktop-chromium"));
        assert!(!scenario.runs_on("mobile-chromium"));

        let resolved = scenario.resolve(&FixtureCatalog::default()).unwrap();
        assert_eq!(resolved.customer.zone_id, "1234");
        assert!(resolved.payment.requires_simulation);
        assert_eq!(resolved.otp.concat(), "0000");
    }

    #[test]
    fn test_resolve_reports_unknown_fixture() {
        let scenario = Scenario::from_yaml("name: x\npayment: dana\n").unwrap();
        let err = scenario.resolve(&FixtureCatalog::default()).unwrap_err();
        assert!(matches!(err, E2eError::FixtureNotFound { kind: "payment method", .. }));
    }

    #[test]
    fn test_load_all_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "name: b\npayment: ximpaysf\ntags: [otp]\n").unwrap();
        std::fs::write(dir.path().join("a.yml"), "name: a\npayment: xendit_qris\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scenarios = Scenario::load_all(dir.path()).unwrap();
        let names: Vec<_> = scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(Scenario::filter_by_tag(&scenarios, "otp").len(), 1);
    }

    #[test]
    fn test_load_all_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.yaml"), "name: same\npayment: ximpaysf\n").unwrap();
        std::fs::write(dir.path().join("two.yaml"), "name: same\npayment: ximpaysf\n").unwrap();
        assert!(matches!(Scenario::load_all(dir.path()), Err(E2eError::SpecParse(_))));
    }
}
