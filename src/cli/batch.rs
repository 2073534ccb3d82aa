use std::sync::Arc;
use std::time::Duration;
use serde_json::json;
use tokio::sync::mpsc;
use crate::batch::{BatchMode, BatchSettings};
use crate::config::types::DEFAULT_MAX_THREADS;
use crate::errors::BreachlineError;
use crate::events::ConsoleEvent;
use crate::render::BatchProgress;
use crate::render::renderer::render_stats;
use super::commands::{BatchArgs, ModeArg};
use super::runtime::{parse_targets, prepare_execution, Runtime};
use tracing::info;

pub async fn handle_batch(args: BatchArgs, quiet: bool) -> Result<(), BreachlineError> {
    if args.targets.is_empty() && !args.all {
        return Err(BreachlineError::Config("name at least one target or pass --all".into()));
    }
    let targets = parse_targets(&args.targets)?;
    let runtime = Runtime::from_args(&args.runtime).await?;
    let settings = batch_settings(&args, BatchSettings::from_config(&runtime.config))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ConsoleEvent>();
    let wizard = Arc::new(runtime.wizard(settings).with_event_channel(event_tx));

    let selection = if args.all { None } else { Some(targets.as_slice()) };
    prepare_execution(&wizard, selection).await?;
    let total = wizard.selected_services().await.len();

    let show_progress = !quiet && !args.json;
    let renderer = tokio::spawn(async move {
        let progress = show_progress.then(|| BatchProgress::new(total));
        while let Some(event) = event_rx.recv().await {
            if let Some(bars) = &progress {
                bars.handle_event(&event);
            }
        }
    });

    let interrupt = {
        let wizard = Arc::clone(&wizard);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling batch");
                wizard.cancel_batch().await;
            }
        })
    };

    let result = wizard.run_batch(None).await;
    interrupt.abort();
    wizard.unmount().await;
    drop(wizard);
    let _ = tokio::time::timeout(Duration::from_secs(1), renderer).await;

    let report = result?;
    if args.json {
        let outcomes: Vec<_> = report.outcomes.iter()
            .map(|(key, outcome)| json!({ "service": key.to_string(), "outcome": outcome }))
            .collect();
        let body = json!({
            "stats": report.stats,
            "cancelled": report.cancelled,
            "outcomes": outcomes,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else if quiet {
        println!("{}", render_stats(&report.stats));
    }
    Ok(())
}

/// Command-line mode flags override the configured batch settings.
fn batch_settings(args: &BatchArgs, mut settings: BatchSettings) -> Result<BatchSettings, BreachlineError> {
    if args.max_threads == Some(0) {
        return Err(BreachlineError::Config("--max-threads must be at least 1".into()));
    }

    let configured_threads = match settings.mode {
        BatchMode::Parallel { max_threads } => max_threads,
        BatchMode::Sequential { .. } => DEFAULT_MAX_THREADS,
    };
    let configured_stagger = match settings.mode {
        BatchMode::Sequential { stagger } => stagger,
        BatchMode::Parallel { .. } => Duration::ZERO,
    };

    let parallel = match args.mode {
        Some(ModeArg::Parallel) => true,
        Some(ModeArg::Sequential) => false,
        None => matches!(settings.mode, BatchMode::Parallel { .. }) || args.max_threads.is_some(),
    };

    settings.mode = if parallel {
        BatchMode::Parallel { max_threads: args.max_threads.unwrap_or(configured_threads) }
    } else {
        BatchMode::Sequential {
            stagger: args.stagger_ms.map(Duration::from_millis).unwrap_or(configured_stagger),
        }
    };
    if let Some(secs) = args.unit_timeout_secs {
        settings.unit_timeout = Some(Duration::from_secs(secs));
    }
    Ok(settings)
}
