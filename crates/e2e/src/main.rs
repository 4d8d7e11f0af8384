//! SFShop E2E suite entry point
//!
//! Runs the checkout scenarios against staging.
//! Run with: cargo run --package sfshop-e2e -- --tag smoke

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sfshop_e2e::playwright::Browser;
use sfshop_e2e::{E2eError, E2eResult, SuiteConfig, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "sfshop-e2e")]
#[command(about = "Checkout E2E suite for the SFShop staging storefront")]
#[command(version)]
struct Args {
    /// Suite configuration file
    #[arg(short, long, default_value = "sfshop-e2e.toml")]
    config: PathBuf,

    /// Path to scenario directory
    #[arg(short, long)]
    specs: Option<PathBuf>,

    /// Run only scenarios matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific scenario by name
    #[arg(short, long)]
    name: Option<String>,

    /// Storefront under test
    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Concurrent test jobs
    #[arg(short, long, env = "WORKERS")]
    workers: Option<usize>,

    /// Run only this device project
    #[arg(short, long, env = "PROJECT")]
    project: Option<String>,

    /// Override the browser of every device project (chromium, firefox, webkit)
    #[arg(long)]
    browser: Option<Browser>,

    /// CI mode: retry failed tests twice
    #[arg(long, env = "CI", value_parser = clap::builder::FalseyValueParser::new())]
    ci: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Skip the HTTP reachability check
    #[arg(long)]
    no_preflight: bool,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = tokio::runtime::Runtime::new()
        .map_err(E2eError::from)
        .and_then(|rt| rt.block_on(async_main(args)));

    match result {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

/// Apply command-line and environment overrides on top of the file config
fn apply_overrides(mut config: SuiteConfig, args: &Args) -> E2eResult<SuiteConfig> {
    if let Some(specs) = &args.specs {
        config.specs_dir = specs.clone();
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if args.ci {
        config.retries = config.retries.max(2);
    }
    if args.headed {
        config.browser.headless = false;
    }
    if args.no_preflight {
        config.preflight = false;
    }
    if let Some(browser) = args.browser {
        for device in &mut config.devices {
            device.browser = browser;
        }
    }
    if let Some(project) = &args.project {
        config.devices.retain(|d| &d.name == project);
        if config.devices.is_empty() {
            return Err(E2eError::Config(format!("unknown project: {}", project)));
        }
    }
    config.validate()?;
    Ok(config)
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let config = apply_overrides(SuiteConfig::load(&args.config)?, &args)?;
    info!(
        "Suite against {} ({} project(s), {} worker(s))",
        config.base_url,
        config.devices.len(),
        config.workers
    );

    let runner = TestRunner::new(config)?;

    let results = if let Some(name) = &args.name {
        runner.run_test(name).await?
    } else if let Some(tag) = &args.tag {
        runner.run_tagged(tag).await?
    } else {
        runner.run_all().await?
    };

    runner.write_results(&results)?;

    Ok(results.failed == 0)
}
