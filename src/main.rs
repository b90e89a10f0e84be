use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repowarden::{
    create_client, CancelFlag, ClientOptions, Config, Credentials, OutcomeStatus, Platform,
    Reconciler, RunReport,
};

#[derive(Parser)]
#[command(name = "repowarden")]
#[command(about = "Bulk-apply branch protection, team access and repository settings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Hosting platform (github, gitlab, bitbucket)
        #[arg(short, long)]
        platform: Platform,

        /// Organization, group or workspace to manage
        #[arg(short, long)]
        org: String,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration file without contacting the platform
    Validate,

    /// List repositories the configuration targets
    List {
        /// Show repository details
        #[arg(long)]
        details: bool,
    },

    /// Apply the configuration to every targeted repository
    Apply {
        /// Show what would be changed without calling mutating endpoints
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref())?;

    match cli.command {
        Commands::Init {
            platform,
            org,
            force,
        } => {
            init_logging(cli.verbose, "info");
            cmd_init(platform, org, force, &config_path)
        }
        Commands::Validate => {
            init_logging(cli.verbose, "info");
            cmd_validate(&config_path)
        }
        Commands::List { details } => {
            let config = Config::load(&config_path)?;
            init_logging(cli.verbose, &config.logging.level);
            cmd_list(details, config).await
        }
        Commands::Apply { dry_run, json } => {
            let config = Config::load(&config_path)?;
            init_logging(cli.verbose, &config.logging.level);
            cmd_apply(dry_run, json, config).await
        }
    }
}

/// Initialize logging based on verbosity and the configured level.
///
/// Logs go to stderr so `--json` output stays machine readable.
fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn resolve_config_path(raw: Option<&str>) -> Result<PathBuf> {
    match raw {
        Some(path) => Config::expand_path(path),
        None => Config::default_config_path(),
    }
}

/// Read credentials for a platform from the environment
fn resolve_credentials(platform: Platform) -> Result<Credentials> {
    fn required(name: &str) -> Result<String> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => bail!("{} must be set", name),
        }
    }

    let credentials = match platform {
        Platform::GitHub => Credentials::Token(required("GITHUB_TOKEN")?),
        Platform::GitLab => Credentials::Token(required("GITLAB_TOKEN")?),
        Platform::Bitbucket => Credentials::Basic {
            username: required("BITBUCKET_USER")?,
            password: required("BITBUCKET_APP_PASSWORD")?,
        },
    };

    debug!("Resolved credentials for {}: {:?}", platform, credentials);
    Ok(credentials)
}

fn build_reconciler(config: Config) -> Result<Reconciler> {
    let credentials = resolve_credentials(config.platform)?;
    let client = create_client(
        config.platform,
        &config.organization,
        &credentials,
        &ClientOptions::from_config(&config),
    )
    .with_context(|| format!("Failed to create {} client", config.platform))?;

    Reconciler::new(Arc::from(client), Arc::new(config))
}

fn cmd_init(platform: Platform, org: String, force: bool, path: &Path) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Configuration already exists at {:?} (use --force to overwrite)",
            path
        );
    }

    let config = Config::new(platform, org);
    config.validate()?;
    config.save(path)?;

    info!("Configuration saved to: {:?}", path);

    println!("✅ Configuration written to {}", path.display());
    println!("   Platform: {}", config.platform);
    println!("   Organization: {}", config.organization);
    println!("   Next: review the rules, then run 'repowarden apply --dry-run'");

    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let config = Config::load(path)?;

    println!("✅ Configuration is valid: {}", path.display());
    println!("   Platform: {}", config.platform);
    println!("   Organization: {}", config.organization);
    println!(
        "   Protected branches: {}",
        config.protected_branches.join(", ")
    );
    println!("   Team grants: {}", config.team_access.len());
    println!("   Repository settings: {}", config.repo_settings.len());
    if config.uses_explicit_repositories() {
        println!("   Repositories: {} listed", config.repositories.len());
    } else {
        println!("   Repositories: all, filtered");
    }

    Ok(())
}

/// List repositories the run would target
async fn cmd_list(details: bool, config: Config) -> Result<()> {
    info!("Listing repositories...");

    let reconciler = build_reconciler(config)?;
    let repositories = reconciler.discover().await?;

    println!("Repositories ({}): ", repositories.len());

    for repo in repositories {
        if details {
            println!("📁 {}", repo.name);
            println!("   👁  Visibility: {:?}", repo.visibility);
            if let Some(branch) = &repo.default_branch {
                println!("   🌿 Default branch: {}", branch);
            }
            if repo.archived {
                println!("   📦 Archived");
            }
            if repo.fork {
                println!("   🍴 Fork");
            }
            println!();
        } else {
            println!("  📁 {}", repo.name);
        }
    }

    Ok(())
}

/// Apply the desired state and report the outcome of every operation
async fn cmd_apply(dry_run: bool, json: bool, config: Config) -> Result<()> {
    let cancel = CancelFlag::new();
    let reconciler = build_reconciler(config)?
        .dry_run(dry_run)
        .with_cancel_flag(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight repositories");
            cancel.cancel();
        }
    });

    let report = reconciler.run().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
        );
    } else {
        print_report(&report);
    }

    let failed = report.failures().count();
    if failed > 0 {
        bail!("{} operations failed", failed);
    }
    if report.cancelled {
        bail!(
            "Run cancelled, {} repositories were not processed",
            report.skipped
        );
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    if report.dry_run {
        println!("🔍 Dry run for {} ({})", report.organization, report.platform);
    } else {
        println!("🔄 Run for {} ({})", report.organization, report.platform);
    }

    for repo in &report.repositories {
        println!("📁 {}", repo.repository);
        for outcome in &repo.outcomes {
            match &outcome.status {
                OutcomeStatus::Applied => println!("   ✅ {}", outcome.operation),
                OutcomeStatus::Planned => println!("   📝 would {}", outcome.operation),
                OutcomeStatus::Failed { cause } => {
                    println!("   ❌ {}: {}", outcome.operation, cause)
                }
            }
        }
    }

    let summary = report.summary();
    println!("\n📈 Summary:");
    println!("   📊 Repositories: {}", summary.repositories);
    if report.dry_run {
        println!("   📝 Planned operations: {}", summary.planned);
    } else {
        println!("   ✅ Applied operations: {}", summary.applied);
        println!("   ❌ Failed operations: {}", summary.failed);
    }
    if report.cancelled {
        println!("   ⏭️  Skipped repositories: {}", report.skipped);
    }
    println!("   ⏱️  Duration: {:.2}s", report.duration_secs);
}
