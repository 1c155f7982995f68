//! TTL-bounded cache suppressing repeat notifications for a slot already seen.
//!
//! Backed by Redis; races between concurrent processes are accepted (at-least-once,
//! not exactly-once - see SPEC_FULL.md §4.7).

use crate::config::DeduplicatorConfig;
use crate::model::{DayOfWeek, DedupKey, LabEvent, Lesson, MatchResult};
use redis::AsyncCommands;
use sha3::{Digest, Sha3_256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub struct Deduplicator {
    conn: redis::aio::ConnectionManager,
    cfg: DeduplicatorConfig,
}

impl Deduplicator {
    pub fn new(conn: redis::aio::ConnectionManager, cfg: DeduplicatorConfig) -> Self {
        Self { conn, cfg }
    }

    /// Filters `matches` down to those with at least one newly-observed `(day, lesson)`
    /// timeslot, refreshing the TTL of slots already seen.
    pub async fn deduplicate(
        &mut self,
        event: &LabEvent,
        matches: Vec<MatchResult>,
    ) -> Result<Vec<MatchResult>, DedupError> {
        let mut result = Vec::with_capacity(matches.len());
        let ttl_secs = self.cfg.ttl.as_secs();

        for m in matches {
            let mut has_new_slot = false;

            for (&day, lessons) in &m.matching_timeslots {
                for &lesson in lessons {
                    let key = self.generate_key(event, m.subscription_uuid, day, lesson);

                    let exists: bool = self.conn.exists(&key).await?;
                    if exists {
                        let _: () = self.conn.expire(&key, ttl_secs as i64).await?;
                    } else {
                        has_new_slot = true;
                        let _: () = self.conn.set_ex(&key, "1", ttl_secs).await?;
                    }
                }
            }

            if has_new_slot {
                result.push(m);
            }
        }

        Ok(result)
    }

    fn generate_key(
        &self,
        event: &LabEvent,
        subscription_uuid: Uuid,
        day: DayOfWeek,
        lesson: Lesson,
    ) -> String {
        let auditorium = event
            .auditorium
            .map(|a| a.to_string())
            .unwrap_or_default();

        let data = format!(
            "{}:{}:{}:{}:{}:{}:{}",
            event.lab_type, event.topic, event.number, auditorium, subscription_uuid, day, lesson
        );

        let mut hasher = Sha3_256::new();
        hasher.update(data.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        let key = DedupKey(bytes);

        format!("{}:{}", self.cfg.key_prefix, key.as_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LabType, Schedule, Topic};
    use std::time::Duration;

    fn sample_event() -> LabEvent {
        LabEvent {
            name: "Ivanov".to_string(),
            lab_type: LabType::Defence,
            topic: Topic::Virtual,
            number: 1,
            auditorium: None,
            spot: None,
            schedule: Schedule::new(),
        }
    }

    fn sample_cfg() -> DeduplicatorConfig {
        DeduplicatorConfig {
            key_prefix: "labwatch".to_string(),
            ttl: Duration::from_secs(3600),
        }
    }

    #[test]
    fn generate_key_is_deterministic() {
        let conn_cfg = sample_cfg();
        let dummy = DummyKeyer { cfg: conn_cfg };
        let event = sample_event();
        let uuid = Uuid::nil();

        let a = dummy.generate_key(&event, uuid, DayOfWeek::Mon, 2);
        let b = dummy.generate_key(&event, uuid, DayOfWeek::Mon, 2);
        assert_eq!(a, b);
        assert!(a.starts_with("labwatch:"));
    }

    #[test]
    fn generate_key_differs_per_lesson() {
        let dummy = DummyKeyer {
            cfg: sample_cfg(),
        };
        let event = sample_event();
        let uuid = Uuid::nil();

        let a = dummy.generate_key(&event, uuid, DayOfWeek::Mon, 2);
        let b = dummy.generate_key(&event, uuid, DayOfWeek::Mon, 3);
        assert_ne!(a, b);
    }

    /// Exercises `generate_key`'s pure logic without needing a live Redis connection.
    struct DummyKeyer {
        cfg: DeduplicatorConfig,
    }

    impl DummyKeyer {
        fn generate_key(
            &self,
            event: &LabEvent,
            subscription_uuid: Uuid,
            day: DayOfWeek,
            lesson: Lesson,
        ) -> String {
            let auditorium = event
                .auditorium
                .map(|a| a.to_string())
                .unwrap_or_default();

            let data = format!(
                "{}:{}:{}:{}:{}:{}:{}",
                event.lab_type,
                event.topic,
                event.number,
                auditorium,
                subscription_uuid,
                day,
                lesson
            );

            let mut hasher = Sha3_256::new();
            hasher.update(data.as_bytes());
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&hasher.finalize());
            let key = DedupKey(bytes);

            format!("{}:{}", self.cfg.key_prefix, key.as_hex())
        }
    }
}
