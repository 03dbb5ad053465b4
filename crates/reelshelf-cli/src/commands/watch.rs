use super::watchlist::print_items;
use super::AppContext;
use crate::output::Output;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use reelshelf_core::{HttpReleaseEndpoint, PageKind, PollOutcome, RefreshPoller, RefreshSink, WatchlistManager};
use reelshelf_models::ReleasedContent;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shows release notifications and reloads the watchlist view on refresh
struct ConsoleSink {
    output: Output,
    watchlist: Arc<WatchlistManager>,
}

impl RefreshSink for ConsoleSink {
    fn notify(&self, released: &ReleasedContent) {
        let titles: Vec<String> = released
            .movies
            .iter()
            .chain(released.tv_shows.iter())
            .map(|item| item.title.clone().unwrap_or_else(|| item.id.clone()))
            .collect();
        self.output.json(&json!({ "type": "released", "released": released }));
        if self.output.is_human() {
            self.output.success(format!(
                "New content available: {} movie(s), {} TV show(s) ({})",
                released.movies.len(),
                released.tv_shows.len(),
                titles.join(", ")
            ));
        }
    }

    fn refresh(&self) {
        info!(operation = "page_refresh", "Refreshing displayed data");
        self.watchlist.reload();
    }
}

fn build_poller(ctx: &AppContext, sink: Arc<dyn RefreshSink>) -> Result<RefreshPoller> {
    let endpoint = HttpReleaseEndpoint::from_config(&ctx.config.poller)
        .map_err(|e| eyre!("Failed to create release endpoint client: {}", e))?;
    Ok(RefreshPoller::new(Arc::new(endpoint), sink)
        .with_interval(Duration::from_secs(ctx.config.poller.interval_seconds)))
}

pub async fn run_watch(page: &str, no_sync: bool, ctx: &AppContext, output: &Output) -> Result<()> {
    info!(
        operation = "watch_started",
        config = %ctx.config_file.display(),
        profile = %ctx.store.dir().display(),
        page,
        "Starting watch"
    );
    let shutdown = CancellationToken::new();
    let watchlist = Arc::new(ctx.watchlist());
    let mut tasks = Vec::new();

    if !no_sync {
        let interval = Duration::from_millis(ctx.config.storage.watch_interval_ms);
        match ctx.store.spawn_watcher(interval, shutdown.clone()) {
            Ok(watcher) => tasks.push(watcher),
            Err(e) => output.warn(format!("Not following changes from other processes: {}", e)),
        }
        tasks.push(watchlist.spawn_sync(shutdown.clone()));

        // Print the view whenever another process changes it
        let mut view = watchlist.view();
        let token = shutdown.clone();
        let out = *output;
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = view.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let items = view.borrow_and_update().clone();
                        out.info(format!("Watchlist updated ({} entries)", items.len()));
                        print_items(&items, &out);
                    }
                }
            }
        }));
    }

    let page_kind = PageKind::for_route(page, &ctx.config.routes);
    let poller_handle = if !ctx.config.poller.enabled {
        output.info("Release polling disabled in config");
        None
    } else {
        let sink = Arc::new(ConsoleSink {
            output: *output,
            watchlist: watchlist.clone(),
        });
        let poller = Arc::new(build_poller(ctx, sink)?);
        let handle = poller.start(page_kind);
        match &handle {
            Some(_) => output.info(format!(
                "Polling {} every {}s for page {}",
                ctx.config.poller.endpoint, ctx.config.poller.interval_seconds, page
            )),
            None => output.info(format!("{} is an admin page, release polling suspended", page)),
        }
        handle
    };

    print_items(&watchlist.snapshot(), output);
    output.info("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;

    info!(operation = "watch_shutdown", "Shutting down");
    shutdown.cancel();
    if let Some(handle) = poller_handle {
        handle.stop().await;
    }
    let abnormal = join_background(tasks).await;
    if abnormal > 0 {
        output.warn(format!("{} background task(s) ended abnormally, see logs", abnormal));
    }
    output.success("Stopped");
    Ok(())
}

/// Wait for background tasks, logging any that panicked. Returns how many did.
async fn join_background(tasks: Vec<JoinHandle<()>>) -> usize {
    let mut abnormal = 0;
    for task in tasks {
        if let Err(e) = task.await {
            warn!(operation = "background_task_failed", error = %e, "Background task ended abnormally");
            abnormal += 1;
        }
    }
    abnormal
}

pub async fn run_poll(ctx: &AppContext, output: &Output) -> Result<()> {
    let watchlist = Arc::new(ctx.watchlist());
    let sink = Arc::new(ConsoleSink {
        output: *output,
        watchlist,
    });
    let poller = build_poller(ctx, sink)?;

    match poller.poll_once().await {
        PollOutcome::Released(count) => {
            output.json(&json!({ "outcome": "released", "count": count }));
        }
        PollOutcome::NothingNew => {
            output.json(&json!({ "outcome": "nothing_new" }));
            output.info("No newly released content");
        }
        PollOutcome::Failed => {
            output.json(&json!({ "outcome": "failed" }));
            output.warn(format!(
                "Release check against {} failed (see logs with -v)",
                ctx.config.poller.endpoint
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_background_counts_panicked_tasks() {
        let tasks = vec![
            tokio::spawn(async {}),
            tokio::spawn(async { panic!("sync task blew up") }),
            tokio::spawn(async {}),
        ];
        assert_eq!(join_background(tasks).await, 1);
    }

    #[tokio::test]
    async fn test_join_background_clean_shutdown() {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { token.cancelled().await });
        shutdown.cancel();
        assert_eq!(join_background(vec![task]).await, 0);
    }
}
