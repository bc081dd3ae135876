use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ratewire::config::RatewireConfig;
use ratewire::ratelimit::{Admission, RateLimiter};

#[derive(Debug, Parser)]
#[command(
    name = "ratewire",
    version,
    about = "Fixed-window rate limit checks against a counter store"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "ratewire.yaml")]
    config: PathBuf,

    /// Print one JSON object per decision
    #[arg(long)]
    json: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate one request per identity against a tenant's policy
    Check {
        /// Tenant whose policy and store apply
        #[arg(short, long)]
        tenant: String,

        /// Client identities, typically IP addresses
        #[arg(required = true)]
        identities: Vec<String>,
    },
    /// Load and validate the configuration, then exit
    Validate,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    identity: &'a str,
    #[serde(flatten)]
    admission: Admission,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = RatewireConfig::from_file(&cli.config)?;
    info!(tenants = config.tenants.len(), "Configuration loaded");

    match cli.command {
        Command::Validate => {
            println!("configuration ok: {} tenant(s)", config.tenants.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { tenant, identities } => {
            check(&config, &tenant, &identities, cli.json).await
        }
    }
}

/// Initialize tracing on stderr so stdout only carries decisions.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn check(
    config: &RatewireConfig,
    tenant_name: &str,
    identities: &[String],
    json: bool,
) -> anyhow::Result<ExitCode> {
    let tenant = config.tenant(tenant_name)?;
    let policy = tenant.policy()?;
    let store = config.store_for(tenant).connect_options();
    let limiter = RateLimiter::new().with_key_prefix(config.key_prefix.clone());

    info!(
        tenant = %tenant.name,
        max = policy.max(),
        window_seconds = policy.window_seconds(),
        endpoint = %store.endpoint(),
        "Evaluating {} identities",
        identities.len()
    );

    let results = join_all(
        identities
            .iter()
            .map(|identity| limiter.evaluate(identity, &policy, &store)),
    )
    .await;

    let mut throttled = false;
    let mut unavailable = false;

    for (identity, result) in identities.iter().zip(results) {
        let (admission, error) = match result {
            Ok(decision) => (Admission::from_decision(decision), None),
            Err(e) => {
                error!(identity = %identity, error = %e, "Rate limit decision failed");
                (e.admission(config.failure_mode), Some(e.to_string()))
            }
        };

        match admission {
            Admission::Throttled => throttled = true,
            Admission::Unavailable { admitted: false } => unavailable = true,
            _ => {}
        }

        let report = Report {
            identity,
            admission,
            status: admission.status_code(),
            error,
        };
        if json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            println!("{} {}", report.identity, describe(&report));
        }
    }

    Ok(if unavailable {
        ExitCode::from(2)
    } else if throttled {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn describe(report: &Report<'_>) -> String {
    let outcome = match report.admission {
        Admission::Allowed => "allowed".to_string(),
        Admission::Throttled => "throttled".to_string(),
        Admission::Unavailable { admitted } => format!(
            "store unavailable ({})",
            if admitted { "failing open" } else { "failing closed" }
        ),
    };
    match &report.error {
        Some(e) => format!("{} [{}] {}", report.status, outcome, e),
        None => format!("{} [{}]", report.status, outcome),
    }
}
