//! Per-source fetch: initial payload, enumerate additional dates, merge.

use super::payload::SlotPayload;
use crate::model::SourceId;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),
    #[error("failed to parse response body: {0}")]
    Parse(#[from] reqwest::Error),
    #[error("fetch cancelled")]
    Cancelled,
}

pub struct SlotFetcher {
    client: reqwest_middleware::ClientWithMiddleware,
    slots_source_url: String,
}

impl SlotFetcher {
    pub fn new(client: reqwest_middleware::ClientWithMiddleware, slots_source_url: String) -> Self {
        Self {
            client,
            slots_source_url,
        }
    }

    /// Fetches and merges every date for `source_id`. Fatal on any failure: the
    /// whole result is abandoned rather than returned partially merged.
    pub async fn fetch(
        &self,
        source_id: SourceId,
        cancel: &CancellationToken,
    ) -> Result<SlotPayload, FetchError> {
        let mut payload = self.fetch_one(source_id, None, cancel).await?;
        let dates = payload.data.dates_true.clone();

        for date in dates.into_iter().skip(1) {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let next = self.fetch_one(source_id, Some(&date), cancel).await?;
            payload.merge(next);
        }

        Ok(payload)
    }

    async fn fetch_one(
        &self,
        source_id: SourceId,
        date: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SlotPayload, FetchError> {
        let mut params = vec![("service_id[]".to_string(), source_id.to_string())];
        if let Some(date) = date {
            params.push(("date".to_string(), date.to_string()));
        }

        let response = self
            .client
            .get(&self.slots_source_url)
            .query(&params)
            .with_extension(cancel.clone())
            .send()
            .await
            .map_err(|e| {
                if cancel.is_cancelled() {
                    FetchError::Cancelled
                } else {
                    FetchError::Request(e)
                }
            })?;

        let payload: SlotPayload = response.json().await?;
        Ok(payload)
    }
}
