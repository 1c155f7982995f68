//! Matches a parsed `LabEvent` against open subscriptions.
//!
//! The query is a single hand-written CTE, issued via `sqlx::query` rather than
//! an ORM, consistent with the rest of this crate's data access.

use crate::model::{DayOfWeek, LabEvent, Lesson, MatchResult};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed matching_timeslots json: {0}")]
    MalformedTimeslots(#[from] serde_json::Error),
}

#[async_trait::async_trait]
pub trait MatchRepository: Send + Sync {
    async fn find_matches(&self, event: &LabEvent) -> Result<Vec<MatchResult>, MatchError>;
}

pub struct MatchEngine {
    repository: std::sync::Arc<dyn MatchRepository>,
}

impl MatchEngine {
    pub fn new(repository: std::sync::Arc<dyn MatchRepository>) -> Self {
        Self { repository }
    }

    pub async fn find_matches(&self, event: &LabEvent) -> Result<Vec<MatchResult>, MatchError> {
        self.repository.find_matches(event).await
    }
}

pub struct PgMatchRepository {
    pool: PgPool,
}

impl PgMatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const MATCH_QUERY: &str = r#"
WITH available_slots_expanded AS (
    SELECT
        days.key AS day_of_week,
        lessons.key::int AS lesson,
        lessons.value AS teachers
    FROM jsonb_each($5::jsonb) AS days,
         LATERAL jsonb_each(days.value) AS lessons
),
matching_subscriptions AS (
    SELECT
        s.subscription_uuid,
        s.user_uuid,
        d.successful_subscriptions,
        d.last_successful_subscription,
        ase.day_of_week::day_of_week AS day_of_week,
        ase.lesson
    FROM subscription_service.subscriptions s
    INNER JOIN subscription_service.details d ON s.user_uuid = d.user_uuid
    CROSS JOIN available_slots_expanded ase
    INNER JOIN subscription_service.time_preferences tp
        ON s.user_uuid = tp.user_uuid
        AND tp.day_of_week = ase.day_of_week::day_of_week
        AND ase.lesson = ANY(tp.lessons)
    INNER JOIN subscription_service.teacher_preferences teachp
        ON s.user_uuid = teachp.user_uuid
    WHERE s.lab_type = $1
      AND s.lab_topic = $2
      AND s.lab_number = $3
      AND (s.lab_auditorium IS NULL OR s.lab_auditorium = $4)
      AND s.closed_at IS NULL
      AND (
          jsonb_array_length(ase.teachers) = 0
          OR EXISTS (
              SELECT 1
              FROM jsonb_array_elements_text(ase.teachers) teacher
              WHERE teacher != ALL(teachp.blacklisted_teachers)
          )
      )
),
grouped_by_day AS (
    SELECT
        user_uuid,
        subscription_uuid,
        successful_subscriptions,
        last_successful_subscription,
        day_of_week,
        jsonb_agg(DISTINCT lesson ORDER BY lesson) AS lessons_array
    FROM matching_subscriptions
    GROUP BY user_uuid, subscription_uuid, successful_subscriptions, last_successful_subscription, day_of_week
)
SELECT
    user_uuid,
    subscription_uuid,
    successful_subscriptions,
    last_successful_subscription,
    jsonb_object_agg(day_of_week, lessons_array) AS matching_timeslots
FROM grouped_by_day
GROUP BY user_uuid, subscription_uuid, successful_subscriptions, last_successful_subscription
ORDER BY
    successful_subscriptions ASC,
    last_successful_subscription ASC NULLS FIRST,
    subscription_uuid ASC
"#;

#[async_trait::async_trait]
impl MatchRepository for PgMatchRepository {
    async fn find_matches(&self, event: &LabEvent) -> Result<Vec<MatchResult>, MatchError> {
        let available_slots = available_slots_json(event);

        let rows = sqlx::query(MATCH_QUERY)
            .bind(event.lab_type)
            .bind(event.topic)
            .bind(event.number as i32)
            .bind(event.auditorium)
            .bind(available_slots)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            use sqlx::Row;

            let user_uuid: Uuid = row.try_get("user_uuid")?;
            let subscription_uuid: Uuid = row.try_get("subscription_uuid")?;
            let successful_subscriptions: i32 = row.try_get("successful_subscriptions")?;
            let last_successful_subscription: Option<DateTime<Utc>> =
                row.try_get("last_successful_subscription")?;
            let matching_timeslots_json: serde_json::Value = row.try_get("matching_timeslots")?;

            results.push(MatchResult {
                user_uuid,
                subscription_uuid,
                successful_subscriptions,
                last_successful_subscription,
                matching_timeslots: parse_matching_timeslots(matching_timeslots_json)?,
            });
        }

        Ok(results)
    }
}

/// Builds the `{day: {lesson: [teacher, ...]}}` JSON blob the matching query expects.
fn available_slots_json(event: &LabEvent) -> serde_json::Value {
    let mut days = serde_json::Map::new();
    for (day, lessons) in &event.schedule {
        let mut lesson_map = serde_json::Map::new();
        for (lesson, teachers) in lessons {
            lesson_map.insert(
                lesson.to_string(),
                serde_json::Value::Array(
                    teachers
                        .iter()
                        .map(|t| serde_json::Value::String(t.clone()))
                        .collect(),
                ),
            );
        }
        days.insert(day.as_str().to_string(), serde_json::Value::Object(lesson_map));
    }
    serde_json::Value::Object(days)
}

fn parse_matching_timeslots(
    value: serde_json::Value,
) -> Result<BTreeMap<DayOfWeek, Vec<Lesson>>, serde_json::Error> {
    let raw: BTreeMap<String, Vec<i64>> = serde_json::from_value(value)?;
    let mut out = BTreeMap::new();
    for (day, lessons) in raw {
        let Some(day) = day_of_week_from_str(&day) else {
            continue;
        };
        out.insert(day, lessons.into_iter().map(|l| l as Lesson).collect());
    }
    Ok(out)
}

fn day_of_week_from_str(s: &str) -> Option<DayOfWeek> {
    Some(match s {
        "mon" => DayOfWeek::Mon,
        "tue" => DayOfWeek::Tue,
        "wed" => DayOfWeek::Wed,
        "thu" => DayOfWeek::Thu,
        "fri" => DayOfWeek::Fri,
        "sat" => DayOfWeek::Sat,
        "sun" => DayOfWeek::Sun,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LabType, Schedule, Topic};

    fn sample_event() -> LabEvent {
        let mut schedule: Schedule = Schedule::new();
        schedule
            .entry(DayOfWeek::Mon)
            .or_default()
            .entry(2)
            .or_default()
            .push("Ivanov".to_string());

        LabEvent {
            name: "Ivanov".to_string(),
            lab_type: LabType::Defence,
            topic: Topic::Virtual,
            number: 1,
            auditorium: None,
            spot: None,
            schedule,
        }
    }

    #[test]
    fn builds_nested_json_per_day_and_lesson() {
        let event = sample_event();
        let json = available_slots_json(&event);
        assert_eq!(json["mon"]["2"][0], "Ivanov");
    }

    #[test]
    fn parses_matching_timeslots_back_from_json() {
        let value = serde_json::json!({"mon": [1, 2], "fri": [3]});
        let parsed = parse_matching_timeslots(value).unwrap();
        assert_eq!(parsed[&DayOfWeek::Mon], vec![1, 2]);
        assert_eq!(parsed[&DayOfWeek::Fri], vec![3]);
    }

    #[test]
    fn unknown_day_keys_are_skipped() {
        let value = serde_json::json!({"notaday": [1]});
        let parsed = parse_matching_timeslots(value).unwrap();
        assert!(parsed.is_empty());
    }
}
