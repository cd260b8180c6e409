use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use geoharvest_client::CswClientFactory;
use geoharvest_core::{
    CatalogClient, CatalogClientFactory, ConfigStore, DbConfig, HarvestResult, HarvestService,
    HarvestSettings, HarvesterEntry, HarvestersConfig, HttpConfig, Scheduler, load_harvesters_config,
};
use geoharvest_db::{CatalogRepository, HarvestStateRepository, run_migrations};

mod config;

use config::{Command, Config};

type Harvester = Scheduler<
    CswClientFactory,
    CatalogRepository,
    CatalogRepository,
    HarvestStateRepository,
    HarvestStateRepository,
>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    match config.command {
        Command::Harvest {
            ref node,
            page_size,
            keep_unseen,
        } => {
            let entries = load_entries(config.config.clone(), node.as_deref())?;
            if entries.is_empty() {
                info!("No enabled harvester nodes found in configuration.");
                return Ok(());
            }
            let mut settings = settings(page_size);
            if keep_unseen {
                settings = settings.without_removal();
            }
            let pool = connect(config.database_url.as_deref()).await?;
            let scheduler = build_scheduler(pool, &entries, settings).await?;
            handle_harvest(&scheduler, &entries).await?;
        }
        Command::Watch { page_size } => {
            let entries = load_entries(config.config.clone(), None)?;
            let pool = connect(config.database_url.as_deref()).await?;
            let scheduler = build_scheduler(pool, &entries, settings(page_size)).await?;
            handle_watch(&scheduler).await?;
        }
        Command::Nodes => {
            let entries = load_all_entries(config.config.clone())?;
            let pool = connect(config.database_url.as_deref()).await?;
            list_nodes(&entries, &pool).await?;
        }
        Command::Validate { probe } => {
            let entries = load_all_entries(config.config.clone())?;
            validate(&entries, probe).await?;
        }
    }

    Ok(())
}

fn settings(page_size: Option<u32>) -> HarvestSettings {
    match page_size {
        Some(size) => HarvestSettings::default().with_page_size(size),
        None => HarvestSettings::default(),
    }
}

fn load_all_entries(path: Option<PathBuf>) -> anyhow::Result<Vec<HarvesterEntry>> {
    Ok(load_config(path)?.harvesters)
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<HarvestersConfig> {
    load_harvesters_config(path)?.ok_or_else(|| {
        anyhow::anyhow!(
            "No configuration file found. Create ~/.config/geoharvest/harvesters.toml or use --config"
        )
    })
}

/// Selects one node by id or name, or every enabled node.
fn load_entries(
    path: Option<PathBuf>,
    node: Option<&str>,
) -> anyhow::Result<Vec<HarvesterEntry>> {
    let config = load_config(path)?;
    match node {
        Some(key) => {
            let entry = config
                .find(key)
                .ok_or_else(|| anyhow::anyhow!("Node '{}' not found in configuration", key))?;
            if !entry.enabled {
                info!("Note: node '{}' is marked as disabled in configuration", key);
            }
            Ok(vec![entry.clone()])
        }
        None => Ok(config.enabled().into_iter().cloned().collect()),
    }
}

async fn connect(database_url: Option<&str>) -> anyhow::Result<PgPool> {
    let database_url = database_url
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set (use --database-url or .env)"))?;

    info!("Connecting to database...");
    let db_config = DbConfig::default();
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    run_migrations(&pool)
        .await
        .context("Failed to initialize database schema")?;
    Ok(pool)
}

/// Registers every entry with a fresh config store and wires the scheduler.
async fn build_scheduler(
    pool: PgPool,
    entries: &[HarvesterEntry],
    settings: HarvestSettings,
) -> anyhow::Result<Harvester> {
    let catalog = CatalogRepository::new(pool.clone());
    let state = HarvestStateRepository::new(pool);

    let nodes = ConfigStore::new(catalog.clone());
    for entry in entries {
        nodes
            .create(entry.to_draft())
            .await
            .with_context(|| format!("Invalid configuration for node '{}'", entry.id))?;
    }

    let service = HarvestService::with_settings(
        CswClientFactory::new(HttpConfig::default()),
        catalog,
        settings,
    );
    Ok(Scheduler::new(service, nodes, state.clone(), state))
}

/// Runs every configured node once, in parallel. Ctrl-C cancels the runs.
async fn handle_harvest(scheduler: &Harvester, entries: &[HarvesterEntry]) -> anyhow::Result<()> {
    let interrupt = scheduler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling active harvests...");
            interrupt.shutdown().await;
        }
    });

    let mut handles = Vec::with_capacity(entries.len());
    for entry in entries {
        handles.push(scheduler.trigger(&entry.id)?);
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let node_id = handle.node_id().to_string();
        match handle.wait().await {
            Ok(result) => {
                print_summary(&result);
                results.push(result);
            }
            Err(e) => error!(node_id = %node_id, "Harvest task failed: {}", e),
        }
    }

    let completed = results.iter().filter(|r| r.is_completed()).count();
    if results.len() > 1 {
        info!(
            "Harvested {} nodes: {} completed, {} cancelled, {} failed",
            results.len(),
            completed,
            results.iter().filter(|r| r.is_cancelled()).count(),
            results.iter().filter(|r| r.is_failed()).count()
        );
    }
    if completed < entries.len() {
        anyhow::bail!(
            "{} of {} harvests did not complete",
            entries.len() - completed,
            entries.len()
        );
    }
    Ok(())
}

async fn handle_watch(scheduler: &Harvester) -> anyhow::Result<()> {
    let scheduled = scheduler.start()?;
    if scheduled == 0 {
        anyhow::bail!("No enabled node has every_minutes set; nothing to watch");
    }
    info!("Watching {} scheduled nodes. Press Ctrl-C to stop.", scheduled);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down, waiting for active harvests...");
    scheduler.shutdown().await;
    info!("Stopped.");
    Ok(())
}

async fn list_nodes(entries: &[HarvesterEntry], pool: &PgPool) -> anyhow::Result<()> {
    let catalog = CatalogRepository::new(pool.clone());
    let state = HarvestStateRepository::new(pool.clone());
    let results = state.all_results().await?;

    if entries.is_empty() {
        println!("No harvester nodes configured.");
        return Ok(());
    }

    println!();
    for entry in entries {
        let draft = entry.to_draft();
        let source_id = draft.source_id.as_deref().unwrap_or(&entry.id);
        let records = catalog.count_for_source(source_id).await?;
        let schedule = entry
            .every_minutes
            .map(|m| format!("every {} min", m))
            .unwrap_or_else(|| "on demand".to_string());

        println!(
            "{} ({}){}",
            entry.id,
            entry.name,
            if entry.enabled { "" } else { " [disabled]" }
        );
        println!("   endpoint:  {}", entry.endpoint);
        println!("   schedule:  {}", schedule);
        println!("   records:   {}", records);
        match results.iter().find(|r| r.node_id == entry.id) {
            Some(result) => println!(
                "   last run:  {} at {} (+{} ~{} -{}, {} errors)",
                result.status,
                result.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
                result.stats.added,
                result.stats.updated,
                result.stats.removed,
                result.stats.errors
            ),
            None => println!("   last run:  never"),
        }
        println!();
    }

    Ok(())
}

async fn validate(entries: &[HarvesterEntry], probe: bool) -> anyhow::Result<()> {
    let factory = CswClientFactory::new(HttpConfig::default());
    let mut invalid = 0;

    for entry in entries {
        if let Err(e) = entry.to_draft().validate() {
            invalid += 1;
            error!("✗ {}: {}", entry.id, e.user_message());
            continue;
        }
        if !probe {
            info!("✓ {}", entry.id);
            continue;
        }

        let probed = match factory.create(&entry.endpoint) {
            Ok(client) => client.get_capabilities().await,
            Err(e) => Err(e),
        };
        match probed {
            Ok(info) => info!(
                "✓ {}: {} (CSW {})",
                entry.id,
                info.title.as_deref().unwrap_or("untitled catalog"),
                info.version.as_deref().unwrap_or("?")
            ),
            Err(e) => {
                invalid += 1;
                error!("✗ {}: {}", entry.id, e.user_message());
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{} of {} nodes failed validation", invalid, entries.len());
    }
    info!("{} nodes OK", entries.len());
    Ok(())
}

fn print_summary(result: &HarvestResult) {
    let stats = &result.stats;
    info!("");
    info!("═══════════════════════════════════════════════════════");
    info!("Harvest {}: {}", result.status, result.node_id);
    info!("═══════════════════════════════════════════════════════");
    info!("  + Added:             {}", stats.added);
    info!("  ↑ Updated:           {}", stats.updated);
    info!("  - Removed:           {}", stats.removed);
    info!("  = Unchanged:         {}", stats.unchanged);
    info!("  ⇄ Duplicates:        {}", stats.duplicates_skipped);
    info!("  ? Unknown schema:    {}", stats.unknown_schema);
    info!("  ✗ Errors:            {}", stats.errors);
    info!("───────────────────────────────────────────────────────");
    info!("  Endpoints visited:   {}", result.endpoints_visited);
    info!("  Searches truncated:  {}", result.searches_truncated);
    info!("  Duration:            {}s", result.duration().num_seconds());
    if let Some(err) = &result.error {
        info!("  Last error:          {}", err);
    }
    info!("═══════════════════════════════════════════════════════");
}
