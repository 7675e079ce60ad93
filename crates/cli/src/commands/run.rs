//! Run command - the watch-and-mirror loop

use anyhow::{Context, Result, bail};
use mirrorpost_adapters::{
    BlueskyTarget, HttpMediaCache, MastodonTarget, TimelineSource, ledger::FileLedger,
};
use mirrorpost_domain::{
    PostOutcome, PublishTarget,
    usecases::{SyncConfig, SyncEngine, SyncError},
};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval};

use crate::args::RunArgs;
use crate::config::AppConfig;

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;

    tracing::info!(
        dry_run = args.dry_run,
        once = args.once,
        handle = %config.source.user_handle,
        interval_ms = config.sync.interval_ms,
        "Starting mirrorpost"
    );

    // Build dependencies
    let ledger = Arc::new(
        FileLedger::open(&config.general.data_dir)
            .await
            .context("Failed to open sync ledger")?,
    );
    tracing::info!(synced = ledger.len(), "Sync ledger loaded");

    let media_cache = Arc::new(
        HttpMediaCache::new(config.general.data_dir.join("media_staging"))
            .context("Failed to prepare media staging directory")?,
    );

    let source = Arc::new(build_source(&config)?);
    {
        // The gate fires from inside connect(); a failure leaves the engine
        // initializing, which doctor can diagnose.
        let source = Arc::clone(&source);
        tokio::spawn(async move {
            if let Err(error) = source.connect().await {
                tracing::error!(%error, "Source session verification failed");
            }
        });
    }

    let mastodon: Arc<MastodonTarget> = if config.mastodon.enabled {
        Arc::new(build_mastodon(&config)?)
    } else {
        Arc::new(MastodonTarget::disabled())
    };

    let bluesky: Arc<BlueskyTarget> = if config.bluesky.enabled {
        let bluesky = Arc::new(build_bluesky(&config)?);
        {
            let bluesky = Arc::clone(&bluesky);
            tokio::spawn(async move {
                if let Err(error) = bluesky.login().await {
                    tracing::error!(%error, "Bluesky login failed");
                }
            });
        }
        bluesky
    } else {
        Arc::new(BlueskyTarget::disabled())
    };

    let targets: Vec<Arc<dyn PublishTarget>> = vec![mastodon, bluesky];
    if !targets.iter().any(|t| t.is_enabled()) && !args.dry_run {
        bail!("No publish targets enabled; enable [mastodon] or [bluesky] in the config");
    }

    let cutoff_epoch = config
        .sync
        .cutoff_epoch
        .unwrap_or_else(|| OffsetDateTime::now_utc().unix_timestamp());

    let engine = SyncEngine::new(
        source,
        media_cache,
        ledger,
        targets,
        SyncConfig {
            cutoff_epoch,
            dry_run: args.dry_run,
        },
    );

    engine.wait_until_ready().await;

    if args.once {
        tracing::info!("Running single tick");
        let results = run_one_tick(&engine).await?;
        tracing::info!(processed = results, "Tick complete");
        tracing::info!("mirrorpost run completed");
        return Ok(());
    }

    // A tick that overruns the interval defers the next tick; ticks never
    // run concurrently and never accumulate a backlog.
    let mut ticker = interval(Duration::from_millis(config.sync.interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Set up graceful shutdown
    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        tracing::info!("Shutdown signal received");
    };

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_one_tick(&engine).await {
                    Ok(processed) => {
                        if processed > 0 {
                            tracing::info!(processed, "Tick complete");
                        }
                    }
                    Err(error) => return Err(error),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down gracefully");
                break;
            }
        }
    }

    tracing::info!("mirrorpost run completed");
    Ok(())
}

/// Run one tick; only ledger persistence failures abort the process
async fn run_one_tick(
    engine: &SyncEngine<TimelineSource, HttpMediaCache, FileLedger>,
) -> Result<usize> {
    match engine.run_tick().await {
        Ok(results) => {
            for (post_id, outcome) in &results {
                match outcome {
                    PostOutcome::Published { targets } => {
                        tracing::info!(post_id = %post_id, targets = ?targets, "Published");
                    }
                    PostOutcome::AllTargetsFailed => {
                        tracing::warn!(post_id = %post_id, "All targets failed; will retry next tick");
                    }
                    PostOutcome::DryRun => {
                        tracing::info!(post_id = %post_id, "[DRY RUN] Skipped publishing");
                    }
                }
            }
            Ok(results.len())
        }
        Err(error @ SyncError::Ledger(_)) => {
            // Continuing would risk double publication after a restart.
            Err(anyhow::Error::new(error)
                .context("Ledger persistence failed; stopping to avoid double publication"))
        }
        Err(error) => {
            tracing::error!(%error, "Tick failed");
            Ok(0)
        }
    }
}

fn build_source(config: &AppConfig) -> Result<TimelineSource> {
    if config.source.user_handle.is_empty() || config.source.user_id.is_empty() {
        bail!("source.user_handle and source.user_id must be configured");
    }
    let token = load_secret(&config.source.session_token_env, "source")?;
    Ok(TimelineSource::with_base_url(
        config.source.user_handle.clone(),
        config.source.user_id.clone(),
        token,
        config.source.base_url.clone(),
    ))
}

fn build_mastodon(config: &AppConfig) -> Result<MastodonTarget> {
    if config.mastodon.instance_url.is_empty() {
        bail!("mastodon.instance_url must be configured when mastodon is enabled");
    }
    let token = load_secret(&config.mastodon.access_token_env, "mastodon")?;
    Ok(MastodonTarget::new(
        config.mastodon.instance_url.clone(),
        token,
    ))
}

fn build_bluesky(config: &AppConfig) -> Result<BlueskyTarget> {
    if config.bluesky.identifier.is_empty() {
        bail!("bluesky.identifier must be configured when bluesky is enabled");
    }
    let password = load_secret(&config.bluesky.app_password_env, "bluesky")?;
    Ok(BlueskyTarget::new(
        config.bluesky.service_url.clone(),
        config.bluesky.identifier.clone(),
        password,
    ))
}

pub(crate) fn load_secret(env_var: &str, collaborator: &str) -> Result<SecretString> {
    if env_var.trim().is_empty() {
        bail!("No credential env var configured for {}", collaborator);
    }

    let value = std::env::var(env_var).with_context(|| {
        format!("Missing credential env var {} for {}", env_var, collaborator)
    })?;

    if value.trim().is_empty() {
        bail!("Credential env var {} is empty for {}", env_var, collaborator);
    }

    Ok(SecretString::new(value.into()))
}
