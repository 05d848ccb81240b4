use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use punchpass_lib::providers::memory::{MemoryBackend, MemoryFixture};
use punchpass_lib::{
    Dashboard, DashboardConfig, DashboardSnapshot, FetchState, IdentityState, Lifecycle,
    PassRecord,
};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "punchpass", about = "Household punch-pass dashboard", version)]
struct Cli {
    /// Dashboard configuration (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load a household fixture and print the settled dashboard.
    Snapshot {
        #[arg(long)]
        fixture: PathBuf,
        /// Emit the raw JSON snapshot instead of the text view.
        #[arg(long)]
        json: bool,
    },
    /// Dispatch a row action against a fixture and print its outcome.
    Action {
        #[arg(long)]
        fixture: PathBuf,
        /// download_receipt | view_usage_history | schedule_appointment
        command: String,
        /// Pass identifier the action applies to.
        #[arg(long)]
        pass: String,
    },
}

fn main() {
    punchpass_lib::init_logging();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    let runtime = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    match cli.command {
        Commands::Snapshot { fixture, json } => {
            runtime.block_on(handle_snapshot(config, &fixture, json))
        }
        Commands::Action {
            fixture,
            command,
            pass,
        } => runtime.block_on(handle_action(config, &fixture, &command, &pass)),
    }
}

fn load_config(path: Option<&Path>) -> Result<DashboardConfig> {
    let config = match path {
        Some(path) => DashboardConfig::from_path(path)?,
        None => DashboardConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn load_fixture(path: &Path) -> Result<MemoryFixture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read fixture {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse fixture {}", path.display()))
}

async fn settle(
    config: DashboardConfig,
    fixture: &Path,
) -> Result<(Dashboard, MemoryBackend, DashboardSnapshot)> {
    let backend = MemoryBackend::from_fixture(load_fixture(fixture)?);
    let dashboard = Dashboard::new(config, backend.services())?;
    dashboard.start();
    let snapshot = tokio::time::timeout(
        SETTLE_TIMEOUT,
        dashboard.wait_until(|snap| {
            snap.settled() || matches!(snap.identity, IdentityState::Failed(_))
        }),
    )
    .await
    .context("dashboard did not settle")?;
    Ok((dashboard, backend, snapshot))
}

async fn handle_snapshot(config: DashboardConfig, fixture: &Path, emit_json: bool) -> Result<i32> {
    let (_dashboard, _backend, snapshot) = settle(config, fixture).await?;
    if emit_json {
        let serialized =
            serde_json::to_string_pretty(&snapshot).context("serialize dashboard snapshot")?;
        println!("{serialized}");
    } else {
        print_snapshot(&snapshot);
    }
    Ok(if snapshot.latest_error.is_some() { 1 } else { 0 })
}

fn print_snapshot(snapshot: &DashboardSnapshot) {
    if let Some(title) = &snapshot.card_title {
        println!("{title}");
    }
    if let IdentityState::Failed(err) = &snapshot.identity {
        println!("  identity: {err}");
        return;
    }
    for section in &snapshot.sections {
        println!();
        println!("{} ({})", section.header, section.total);
        if let FetchState::Failed(err) = snapshot.fetch(section.lifecycle) {
            println!("  error: {err}");
        }
        if let Some(empty) = &section.empty_description {
            println!("  {empty}");
            continue;
        }
        for group in snapshot.groups(section.lifecycle) {
            println!("  {}", group.section_label());
            if group.is_empty() {
                println!("    {}", section.empty_member_description);
            }
            for pass in group.passes() {
                println!(
                    "    {:<24} used {:>4} remaining {:>4} expires {}",
                    pass.type_label.as_deref().unwrap_or("-"),
                    pass.total_used.map(|v| v.to_string()).unwrap_or_default(),
                    pass.remaining.map(|v| v.to_string()).unwrap_or_default(),
                    pass.expiration_date
                        .map(|d| d.format("%B %d, %Y").to_string())
                        .unwrap_or_default()
                );
            }
        }
    }
}

fn find_pass(snapshot: &DashboardSnapshot, pass_id: &str) -> Option<PassRecord> {
    Lifecycle::ALL
        .iter()
        .flat_map(|&lifecycle| snapshot.groups(lifecycle))
        .flat_map(|group| group.passes())
        .find(|pass| pass.id == pass_id)
        .cloned()
}

async fn handle_action(
    config: DashboardConfig,
    fixture: &Path,
    command: &str,
    pass_id: &str,
) -> Result<i32> {
    let (dashboard, backend, snapshot) = settle(config, fixture).await?;
    let pass = find_pass(&snapshot, pass_id).ok_or_else(|| anyhow!("pass {pass_id} not found"))?;
    let task = dashboard.dispatch_named(command, &pass)?;
    task.await.context("join row action")?;

    let after = dashboard.snapshot();
    let navigations: Vec<_> = backend
        .navigation
        .navigations()
        .into_iter()
        .map(|nav| json!({ "url": nav.url, "target": nav.target }))
        .collect();
    let payload = json!({
        "action": after.action,
        "navigations": navigations,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("serialize action outcome")?
    );
    let failed = after.action.as_ref().is_some_and(|ctx| ctx.error.is_some());
    Ok(if failed { 1 } else { 0 })
}
