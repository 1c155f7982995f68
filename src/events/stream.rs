//! Bounded fan-out over the current source set: fetch + parse each source
//! concurrently, feeding a single output channel.

use crate::model::{LabEvent, SourceId};
use crate::parser::{SlotParseError, SlotParser};
use crate::slots::{FetchError, SlotFetcher};
use crate::utils::shutdown::join_tasks;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source {source_id}: fetch failed: {source}")]
    Fetch {
        source_id: SourceId,
        #[source]
        source: FetchError,
    },
    #[error("source {source_id}: parse failed: {source}")]
    Parse {
        source_id: SourceId,
        #[source]
        source: SlotParseError,
    },
}

pub enum StreamItem {
    Event(LabEvent),
    Error(SourceError),
}

/// Drives one fetch+parse pass over `sources`, returning the receiving end of a
/// channel that yields events (and side-channel errors) as workers complete.
/// The channel closes once every worker has finished; cancellation stops workers
/// early but the channel still closes cleanly.
pub fn spawn(
    sources: Arc<Vec<SourceId>>,
    fetcher: Arc<SlotFetcher>,
    parser: Arc<SlotParser>,
    max_concurrency: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<StreamItem> {
    let (tx, rx) = mpsc::channel(256);
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    tokio::spawn(async move {
        let mut handles = Vec::with_capacity(sources.len());

        for &source_id in sources.iter() {
            if cancel.is_cancelled() {
                break;
            }

            let semaphore = semaphore.clone();
            let fetcher = fetcher.clone();
            let parser = parser.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };

                if cancel.is_cancelled() {
                    return;
                }

                let payload = match fetcher.fetch(source_id, &cancel).await {
                    Ok(payload) => payload,
                    Err(source) => {
                        let _ = tx
                            .send(StreamItem::Error(SourceError::Fetch { source_id, source }))
                            .await;
                        return;
                    }
                };

                match parser.parse_slot(&payload) {
                    Ok(events) => {
                        for event in events {
                            if tx.send(StreamItem::Event(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(source) => {
                        let _ = tx
                            .send(StreamItem::Error(SourceError::Parse { source_id, source }))
                            .await;
                    }
                }
            });

            handles.push(handle);
        }

        if let Err(e) = join_tasks(handles).await {
            tracing::warn!(error = %e, "one or more fetch/parse workers panicked");
        }
        // `tx` drops here, closing the channel.
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_display_includes_source_id() {
        let err = SourceError::Fetch {
            source_id: 42,
            source: FetchError::Cancelled,
        };
        assert!(err.to_string().contains("42"));
    }
}
