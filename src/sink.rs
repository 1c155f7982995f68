//! Delivery of confirmed matches. This crate deliberately stops at the trait
//! boundary (see SPEC_FULL.md §2) - wiring a real channel such as Telegram or
//! email is left to the operator.

use crate::model::MatchResult;

#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event_summary: &str, result: &MatchResult);
}

/// Default sink: logs every match at info level. Sufficient for smoke-testing
/// the pipeline end to end before a real channel is wired up.
pub struct LoggingSink;

#[async_trait::async_trait]
impl NotificationSink for LoggingSink {
    async fn notify(&self, event_summary: &str, result: &MatchResult) {
        tracing::info!(
            user_uuid = %result.user_uuid,
            subscription_uuid = %result.subscription_uuid,
            event = event_summary,
            timeslots = ?result.matching_timeslots,
            "match found"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchResult;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn logging_sink_does_not_panic() {
        let sink = LoggingSink;
        let result = MatchResult {
            user_uuid: Uuid::nil(),
            subscription_uuid: Uuid::nil(),
            successful_subscriptions: 0,
            last_successful_subscription: None,
            matching_timeslots: BTreeMap::new(),
        };
        sink.notify("virtual lab 1", &result).await;
    }
}
