//! Test data: customers, payment methods, products and OTP codes

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerData {
    pub player_id: String,
    pub zone_id: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    VirtualAccount,
    Qris,
    Ewallet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub name: String,
    pub kind: PaymentKind,
    /// CSS selector of the payment option on the checkout page
    pub selector: String,
    #[serde(default)]
    pub requires_otp: bool,
    /// Staging-only simulator must be clicked to settle the payment
    #[serde(default)]
    pub requires_simulation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Link text on the homepage, matched case-insensitively
    pub name: String,
    /// Accessible name of the denomination image
    pub image_alt: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpCodes {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

impl Default for OtpCodes {
    fn default() -> Self {
        Self {
            valid: ["1", "2", "3", "4"].map(String::from).to_vec(),
            invalid: ["0", "0", "0", "0"].map(String::from).to_vec(),
        }
    }
}

/// Named fixtures referenced by scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureCatalog {
    pub customers: BTreeMap<String, CustomerData>,
    pub payments: BTreeMap<String, PaymentMethod>,
    pub products: BTreeMap<String, Product>,
    pub otp: OtpCodes,
}

impl Default for FixtureCatalog {
    fn default() -> Self {
        let mut customers = BTreeMap::new();
        customers.insert(
            "default".to_string(),
            CustomerData {
                player_id: "115383687".to_string(),
                zone_id: "2584".to_string(),
                email: "bozartandjung@gmail.com".to_string(),
                phone: "088110001000".to_string(),
            },
        );
        customers.insert(
            "alternative".to_string(),
            CustomerData {
                player_id: "987654321".to_string(),
                zone_id: "1234".to_string(),
                email: "test.user@sfshop.id".to_string(),
                phone: "081234567890".to_string(),
            },
        );
        customers.insert(
            "invalid".to_string(),
            CustomerData {
                player_id: "123".to_string(),
                zone_id: "45".to_string(),
                email: "invalid-email".to_string(),
                phone: "123".to_string(),
            },
        );

        let mut payments = BTreeMap::new();
        payments.insert(
            "ximpaysf".to_string(),
            PaymentMethod {
                name: "XimpaySF Virtual Account".to_string(),
                kind: PaymentKind::VirtualAccount,
                selector: r#"img[alt*="ximpaysf"]"#.to_string(),
                requires_otp: true,
                requires_simulation: false,
            },
        );
        payments.insert(
            "xendit_qris".to_string(),
            PaymentMethod {
                name: "Xendit QRIS".to_string(),
                kind: PaymentKind::Qris,
                selector: r#"img[alt*="xenditqris"]"#.to_string(),
                requires_otp: false,
                requires_simulation: true,
            },
        );

        let mut products = BTreeMap::new();
        products.insert(
            "mobile_legends".to_string(),
            Product {
                name: "Mobile Legends".to_string(),
                image_alt: r"25\+3 Diamonds".to_string(),
                category: "games".to_string(),
            },
        );

        Self {
            customers,
            payments,
            products,
            otp: OtpCodes::default(),
        }
    }
}

impl FixtureCatalog {
    /// Parse a catalog from YAML. Entries are merged over the built-in data.
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let overrides: FixtureCatalog = serde_yaml::from_str(yaml)?;
        let mut catalog = Self::default();
        catalog.customers.extend(overrides.customers);
        catalog.payments.extend(overrides.payments);
        catalog.products.extend(overrides.products);
        catalog.otp = overrides.otp;
        Ok(catalog)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Built-in catalog, merged with `path` when given
    pub fn load(path: Option<&Path>) -> E2eResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn customer(&self, name: &str) -> E2eResult<&CustomerData> {
        self.customers.get(name).ok_or_else(|| E2eError::FixtureNotFound {
            kind: "customer",
            name: name.to_string(),
        })
    }

    pub fn payment(&self, name: &str) -> E2eResult<&PaymentMethod> {
        self.payments.get(name).ok_or_else(|| E2eError::FixtureNotFound {
            kind: "payment method",
            name: name.to_string(),
        })
    }

    pub fn product(&self, name: &str) -> E2eResult<&Product> {
        self.products.get(name).ok_or_else(|| E2eError::FixtureNotFound {
            kind: "product",
            name: name.to_string(),
        })
    }
}
