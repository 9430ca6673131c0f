//! Town directory engine - Main entry point.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use towndir_engine::infrastructure::config::AppConfig;
use towndir_engine::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the engine may be run from `crates/engine`).
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "towndir_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting town directory");

    let config = AppConfig::from_env()?;
    tracing::info!(
        storage = ?config.storage,
        backfill_on_miss = config.backfill_on_miss,
        master_override = config.master_password.enabled_by.is_some(),
        "Loaded configuration"
    );

    let app = App::new(config);
    let towns = app.towns().await?;

    let listing = towns.list_public_towns().await?;
    tracing::info!(
        towns = listing.len(),
        listing = %serde_json::to_string(&listing)?,
        "Public towns"
    );

    tokio::signal::ctrl_c().await?;

    let stats = app.storage().await?.stats();
    tracing::info!(
        fast_hits = stats.fast_hits,
        fast_misses = stats.fast_misses,
        durable_fallbacks = stats.durable_fallbacks,
        backfills = stats.backfills,
        divergences = stats.divergences,
        "Shutting down"
    );

    Ok(())
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
