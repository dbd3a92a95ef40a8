use crate::items::{Item, collect_items};
use crate::report::{format_match, format_track};
use crate::settings::Settings;
use anyhow::{Result, bail};
use geocorrelate_lib::{
    Correlation, CorrelationEvent, CorrelationRun, TrackCorrelator, TrackManager,
    TrackManagerEvent,
};
use tracing_subscriber::EnvFilter;

/// Install the tracing subscriber; `RUST_LOG` takes precedence over `verbose`
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the tracks, correlate the items and print the results
pub async fn run(settings: Settings) -> Result<()> {
    let items = collect_items(settings.items.as_deref(), &settings.timestamps)?;

    let manager = TrackManager::new();
    load_tracks(&manager, &settings).await?;

    let correlator = TrackCorrelator::new(manager).with_batch_size(settings.batch_size);
    let correlations = items
        .iter()
        .enumerate()
        .map(|(index, item)| Correlation::new(item.date_time, index))
        .collect();
    let run = correlator.correlate(correlations, settings.correlation_options())?;

    let resolved = receive_results(run, items.len()).await;
    print_results(&items, &resolved);
    Ok(())
}

async fn load_tracks(manager: &TrackManager, settings: &Settings) -> Result<()> {
    let mut load = manager.load(settings.tracks.iter().cloned());
    while let Some(event) = load.recv().await {
        match event {
            TrackManagerEvent::TracksAdded(ids) => {
                for id in ids {
                    tracing::info!("Loaded {}", format_track(&manager.get_track_by_id(id)));
                }
            }
            TrackManagerEvent::AllTrackFilesLoaded { loaded, failed } => {
                tracing::info!("{} of {} track files loaded", loaded, loaded + failed);
                break;
            }
        }
    }

    for error in manager.read_loading_errors() {
        eprintln!("{}: {}", error.source.display(), error.message);
    }

    if manager.is_empty() {
        bail!("No track could be loaded");
    }
    Ok(())
}

/// Gather batches into a slot per item; Ctrl-C cancels the run
async fn receive_results(
    mut run: CorrelationRun<usize>,
    item_count: usize,
) -> Vec<Option<Correlation<usize>>> {
    let mut resolved: Vec<Option<Correlation<usize>>> = (0..item_count).map(|_| None).collect();
    let mut cancel_requested = false;

    loop {
        let event = tokio::select! {
            event = run.recv() => event,
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                tracing::warn!("Interrupted, cancelling correlation");
                run.cancel();
                cancel_requested = true;
                continue;
            }
        };

        match event {
            Some(CorrelationEvent::ItemsCorrelated(batch)) => {
                for correlation in batch {
                    let index = correlation.user_data;
                    resolved[index] = Some(correlation);
                }
            }
            Some(CorrelationEvent::Done) | None => break,
            Some(CorrelationEvent::Cancelled) => {
                tracing::warn!("Correlation cancelled, results are incomplete");
                break;
            }
        }
    }

    resolved
}

fn print_results(items: &[Item], resolved: &[Option<Correlation<usize>>]) {
    let mut unmatched = Vec::new();
    for (item, correlation) in items.iter().zip(resolved) {
        match correlation {
            Some(correlation) => println!("{}", format_match(item, correlation)),
            None => unmatched.push(item),
        }
    }

    if !unmatched.is_empty() {
        println!("# {} of {} items without position:", unmatched.len(), items.len());
        for item in unmatched {
            println!("# {}", item.label);
        }
    }
}
