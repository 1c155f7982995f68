//! Runs the two periodic jobs driving the pipeline: source-list refresh
//! (long interval) and slot polling (short interval), each on a randomized
//! jitter window so many deployments don't hammer upstream in lockstep.

use crate::config::SchedulerConfig;
use crate::dedup::Deduplicator;
use crate::events::stream::{self, StreamItem};
use crate::matching::MatchEngine;
use crate::model::SourceId;
use crate::parser::SlotParser;
use crate::sink::NotificationSink;
use crate::slots::SlotFetcher;
use crate::sources::SourceRegistry;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Scheduler {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<SlotFetcher>,
    parser: Arc<SlotParser>,
    match_engine: Arc<MatchEngine>,
    deduplicator: Arc<tokio::sync::Mutex<Deduplicator>>,
    sink: Arc<dyn NotificationSink>,
    max_concurrency: usize,
    cfg: SchedulerConfig,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: Arc<SlotFetcher>,
        parser: Arc<SlotParser>,
        match_engine: Arc<MatchEngine>,
        deduplicator: Arc<tokio::sync::Mutex<Deduplicator>>,
        sink: Arc<dyn NotificationSink>,
        max_concurrency: usize,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            fetcher,
            parser,
            match_engine,
            deduplicator,
            sink,
            max_concurrency,
            cfg,
        }
    }

    /// Runs both jobs concurrently until a shutdown signal arrives on either
    /// receiver clone.
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) {
        let refresh_shutdown = shutdown_rx.resubscribe();
        let poll_shutdown = shutdown_rx;

        tokio::join!(
            self.run_refresh_sources(refresh_shutdown),
            self.run_poll_slots(poll_shutdown),
        );
    }

    async fn run_refresh_sources(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("source refresh job started");

        // Refresh once immediately so the registry isn't empty on startup.
        self.registry.refresh().await;
        let mut next_run = time::Instant::now()
            + jittered_interval(self.cfg.refresh_sources_min, self.cfg.refresh_sources_max);

        loop {
            tokio::select! {
                _ = time::sleep_until(next_run) => {
                    self.registry.refresh().await;
                    next_run = time::Instant::now()
                        + jittered_interval(self.cfg.refresh_sources_min, self.cfg.refresh_sources_max);
                }
                _ = shutdown_rx.recv() => {
                    info!("source refresh job exiting");
                    break;
                }
            }
        }
    }

    async fn run_poll_slots(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("slot polling job started");

        let mut next_run = time::Instant::now()
            + jittered_interval(self.cfg.poll_slots_min, self.cfg.poll_slots_max);
        let mut current_work: Option<(tokio::task::JoinHandle<()>, CancellationToken)> = None;

        loop {
            tokio::select! {
                _ = time::sleep_until(next_run) => {
                    if let Some((handle, _)) = &current_work {
                        if !handle.is_finished() {
                            debug!("previous poll cycle still running, skipping this tick");
                            next_run = time::Instant::now()
                                + jittered_interval(self.cfg.poll_slots_min, self.cfg.poll_slots_max);
                            continue;
                        }
                    }

                    let cancel = CancellationToken::new();
                    let handle = tokio::spawn(self.clone_for_poll().poll_once(cancel.clone()));
                    current_work = Some((handle, cancel));

                    next_run = time::Instant::now()
                        + jittered_interval(self.cfg.poll_slots_min, self.cfg.poll_slots_max);
                }
                _ = shutdown_rx.recv() => {
                    info!("slot polling job received shutdown signal");
                    if let Some((handle, cancel)) = current_work.take() {
                        cancel.cancel();
                        if time::timeout(Duration::from_secs(5), handle).await.is_err() {
                            warn!("poll cycle did not complete within 5s, abandoning");
                        }
                    }
                    info!("slot polling job exiting");
                    break;
                }
            }
        }
    }

    /// Cheap `Arc`-cloned handle usable inside a spawned task.
    fn clone_for_poll(&self) -> PollHandle {
        PollHandle {
            registry: self.registry.clone(),
            fetcher: self.fetcher.clone(),
            parser: self.parser.clone(),
            match_engine: self.match_engine.clone(),
            deduplicator: self.deduplicator.clone(),
            sink: self.sink.clone(),
            max_concurrency: self.max_concurrency,
        }
    }
}

/// The pieces of `Scheduler` actually needed inside one spawned poll cycle,
/// held by value so the cycle can outlive `&Scheduler`.
struct PollHandle {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<SlotFetcher>,
    parser: Arc<SlotParser>,
    match_engine: Arc<MatchEngine>,
    deduplicator: Arc<tokio::sync::Mutex<Deduplicator>>,
    sink: Arc<dyn NotificationSink>,
    max_concurrency: usize,
}

impl PollHandle {
    async fn poll_once(self, cancel: CancellationToken) {
        let sources: Arc<Vec<SourceId>> = self.registry.current();
        if sources.is_empty() {
            debug!("no known sources, skipping poll cycle");
            return;
        }

        let mut rx = stream::spawn(
            sources,
            self.fetcher.clone(),
            self.parser.clone(),
            self.max_concurrency,
            cancel,
        );

        while let Some(item) = rx.recv().await {
            match item {
                StreamItem::Event(event) => {
                    let matches = match self.match_engine.find_matches(&event).await {
                        Ok(matches) => matches,
                        Err(e) => {
                            error!(error = %e, "failed to find matches for event");
                            continue;
                        }
                    };

                    if matches.is_empty() {
                        continue;
                    }

                    let filtered = {
                        let mut dedup = self.deduplicator.lock().await;
                        match dedup.deduplicate(&event, matches).await {
                            Ok(filtered) => filtered,
                            Err(e) => {
                                error!(error = %e, "deduplication failed, dropping matches");
                                continue;
                            }
                        }
                    };

                    let summary = format!("{} {} #{}", event.lab_type, event.topic, event.number);
                    for result in &filtered {
                        self.sink.notify(&summary, result).await;
                    }
                }
                StreamItem::Error(e) => {
                    warn!(error = %e, "source produced an error during polling");
                }
            }
        }
    }
}

fn jittered_interval(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::rng().random_range(min..max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_interval_stays_within_bounds() {
        let min = Duration::from_secs(30);
        let max = Duration::from_secs(60);
        for _ in 0..100 {
            let d = jittered_interval(min, max);
            assert!(d >= min && d < max);
        }
    }

    #[test]
    fn jittered_interval_handles_degenerate_range() {
        let d = jittered_interval(Duration::from_secs(10), Duration::from_secs(10));
        assert_eq!(d, Duration::from_secs(10));
    }
}
