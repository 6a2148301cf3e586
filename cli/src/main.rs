use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use directory::{DirectoryClient, RestDirectoryClient};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use sync::{
    DesiredState, GroupReport, GroupStatus, GroupSyncService, SchemaVersion, SyncOptions, groups,
    store
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod housekeeping;

#[derive(Parser)]
#[command(
    name = "usersync",
    version,
    about = "Reconcile group/org memberships against a declarative membership file"
)]
struct Cli {
    /// Comma-separated name:token credential pairs, one per group.
    #[arg(long, env = "USERSYNC_API_KEYS", hide_env_values = true)]
    api_keys: String,

    /// Path to the membership JSON file (flat records or per-group objects).
    #[arg(long, env = "USERSYNC_MEMBERSHIP_FILE")]
    membership_file: PathBuf,

    /// Base URL of the directory API.
    #[arg(long, env = "USERSYNC_API")]
    api_url: String,

    /// Process additions and role updates.
    #[arg(long)]
    add_new: bool,

    /// Remove memberships absent from the file (use with caution).
    #[arg(long)]
    delete_missing: bool,

    /// Provision absent users directly instead of emailing invites.
    #[arg(long)]
    auto_provision: bool,

    /// Compute and log the plan without executing it.
    #[arg(long)]
    dry_run: bool,

    /// Concurrent remote calls per group pass.
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// Membership file schema; detected from the first record when omitted.
    #[arg(long, value_enum)]
    schema: Option<Schema>,

    /// Working directory for the db/, prev/ and log/ subdirectories.
    #[arg(long, env = "USERSYNC_WORK_DIR", default_value = ".")]
    work_dir: PathBuf
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Schema {
    /// Flat array of {userEmail, role, org, group} records.
    Flat,
    /// Array of per-group objects with org collaborator/admin lists.
    Grouped
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    housekeeping::init(&cli.work_dir)?;
    let log_path = housekeeping::run_log_path(&cli.work_dir);
    let log_file = fs::File::create(&log_path)
        .with_context(|| format!("creating run log {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Arc::new(log_file)))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let options = SyncOptions {
        dry_run: cli.dry_run,
        add_new: cli.add_new,
        delete_missing: cli.delete_missing,
        auto_provision: cli.auto_provision,
        concurrency: cli.concurrency
    };
    if options.dry_run {
        info!("dry-run: no remote calls will be made, no state will be written");
    }
    if options.delete_missing && !options.dry_run {
        warn!("--delete-missing is enabled, memberships absent from the file will be removed");
    }

    let raw = fs::read_to_string(&cli.membership_file).with_context(|| {
        format!(
            "reading membership file {}",
            cli.membership_file.display()
        )
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).context("membership file is not valid JSON")?;
    let desired = match cli.schema {
        Some(Schema::Flat) => DesiredState::from_json_as(value, SchemaVersion::V1)?,
        Some(Schema::Grouped) => DesiredState::from_json_as(value, SchemaVersion::V2)?,
        None => DesiredState::from_json(value)?
    };

    let pairs = groups::parse_api_keys(&cli.api_keys)?;
    let handles = groups::discover(&pairs, |token| {
        Ok(Arc::new(RestDirectoryClient::new(&cli.api_url, token)?) as Arc<dyn DirectoryClient>)
    })
    .await?;

    let invite_store = store::default_store(&cli.work_dir);
    invite_store.ensure_initialized()?;

    let group_names = desired.group_names();
    if group_names.is_empty() {
        info!("membership file names no groups, nothing to do");
        return Ok(());
    }

    // One group at a time: each carries its own credential and rate-limit
    // budget, and the invite store is not safe under concurrent passes.
    let mut reports: Vec<GroupReport> = Vec::new();
    let mut failed_groups = 0u32;
    for name in &group_names {
        let Some(handle) = handles.iter().find(|h| h.name.eq_ignore_ascii_case(name)) else {
            warn!(group = %name, "no API credential configured for group, skipping");
            continue;
        };
        if let GroupStatus::Disabled { reason } = &handle.status {
            warn!(group = %handle.name, %reason, "group disabled, skipping");
            continue;
        }

        let client: Arc<dyn DirectoryClient> =
            Arc::new(RestDirectoryClient::new(&cli.api_url, &handle.token)?);
        let service = GroupSyncService::new(client, options.clone());
        match service.sync_group(handle, &desired, &invite_store).await {
            Ok(report) => {
                // Individual operation failures are already logged; they are
                // left for the next run to converge and do not fail the exit.
                reports.push(report);
            }
            Err(err) => {
                error!(group = %handle.name, error = %err, "group pass failed");
                failed_groups += 1;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);

    if failed_groups > 0 {
        bail!("{failed_groups} group pass(es) could not be completed, see the run log");
    }

    if !options.dry_run {
        housekeeping::backup_membership_file(&cli.work_dir, &cli.membership_file)?;
        housekeeping::prune(&cli.work_dir)?;
    }
    info!(groups = reports.len(), "run complete");
    Ok(())
}
