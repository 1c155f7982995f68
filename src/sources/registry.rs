//! Periodically scraped list of active `SourceID`s.
//!
//! Fetches the landing page, finds every `.newrecord2` element, reads its `data-options`
//! attribute as JSON, and extracts `service.id` under `step_data.list[*].services[*]`.
//! The result replaces the in-memory list atomically; a failed refresh leaves the
//! previous set intact (retained, not reset - see DESIGN.md).

use crate::model::SourceId;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum SourceRegistryError {
    #[error("failed to fetch landing page: {0}")]
    Fetch(#[from] reqwest_middleware::Error),
    #[error("failed to read response body: {0}")]
    Body(#[from] reqwest::Error),
    #[error("malformed data-options attribute: {0}")]
    MalformedAttribute(serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct HtmlPageOptions {
    step_data: HtmlStepData,
}

#[derive(Debug, Deserialize)]
struct HtmlStepData {
    list: Vec<HtmlList>,
}

#[derive(Debug, Deserialize)]
struct HtmlList {
    services: Vec<HtmlService>,
}

#[derive(Debug, Deserialize)]
struct HtmlService {
    id: SourceId,
}

pub struct SourceRegistry {
    client: reqwest_middleware::ClientWithMiddleware,
    provider_url: String,
    sources: RwLock<Arc<Vec<SourceId>>>,
}

impl SourceRegistry {
    pub fn new(client: reqwest_middleware::ClientWithMiddleware, provider_url: String) -> Self {
        Self {
            client,
            provider_url,
            sources: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Current source set, cheaply cloned (an `Arc` pointer-swap snapshot).
    pub fn current(&self) -> Arc<Vec<SourceId>> {
        self.sources.read().unwrap().clone()
    }

    /// Re-scrapes the landing page and atomically swaps in the new set. On any
    /// failure, the previous set is retained and the failure is logged - it is
    /// never allowed to empty the registry.
    pub async fn refresh(&self) {
        match self.scrape().await {
            Ok(ids) => {
                let count = ids.len();
                *self.sources.write().unwrap() = Arc::new(ids);
                tracing::info!(source_count = count, "refreshed source id list");
            }
            Err(e) => {
                error!(error = %e, "failed to refresh source ids, retaining previous set");
            }
        }
    }

    async fn scrape(&self) -> Result<Vec<SourceId>, SourceRegistryError> {
        let response = self.client.get(&self.provider_url).send().await?;
        let body = response.text().await?;
        Self::parse(&body)
    }

    fn parse(html: &str) -> Result<Vec<SourceId>, SourceRegistryError> {
        let document = Html::parse_document(html);
        // `.newrecord2` is a valid CSS selector; construction cannot fail here.
        let selector = Selector::parse(".newrecord2").unwrap();

        let mut ids = Vec::new();
        for element in document.select(&selector) {
            let Some(data_options) = element.value().attr("data-options") else {
                continue;
            };

            let options: HtmlPageOptions = match serde_json::from_str(data_options) {
                Ok(o) => o,
                Err(e) => {
                    warn!(error = %e, "skipping element with malformed data-options");
                    continue;
                }
            };

            for list in options.step_data.list {
                for service in list.services {
                    ids.push(service.id);
                }
            }
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_service_ids() {
        let html = r#"
            <div class="newrecord2" data-options='{"step_data":{"list":[{"services":[{"id":101},{"id":102}]}]}}'></div>
            <div class="newrecord2" data-options='{"step_data":{"list":[{"services":[{"id":103}]}]}}'></div>
        "#;
        let ids = SourceRegistry::parse(html).unwrap();
        assert_eq!(ids, vec![101, 102, 103]);
    }

    #[test]
    fn skips_elements_missing_data_options() {
        let html = r#"<div class="newrecord2"></div>"#;
        let ids = SourceRegistry::parse(html).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn ignores_unrelated_elements() {
        let html = r#"<div class="other" data-options='{"step_data":{"list":[{"services":[{"id":1}]}]}}'></div>"#;
        let ids = SourceRegistry::parse(html).unwrap();
        assert!(ids.is_empty());
    }
}
