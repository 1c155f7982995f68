//! Core data types shared across the pipeline: sources, normalized lab events,
//! subscriptions and their matching results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Upstream opaque identifier for a bookable service; the unit of fan-out.
pub type SourceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "day_of_week", rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    /// Maps `chrono::Weekday` (Monday-first) onto our day enum.
    pub fn from_chrono(weekday: chrono::Weekday) -> Self {
        match weekday {
            chrono::Weekday::Mon => DayOfWeek::Mon,
            chrono::Weekday::Tue => DayOfWeek::Tue,
            chrono::Weekday::Wed => DayOfWeek::Wed,
            chrono::Weekday::Thu => DayOfWeek::Thu,
            chrono::Weekday::Fri => DayOfWeek::Fri,
            chrono::Weekday::Sat => DayOfWeek::Sat,
            chrono::Weekday::Sun => DayOfWeek::Sun,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Mon => "mon",
            DayOfWeek::Tue => "tue",
            DayOfWeek::Wed => "wed",
            DayOfWeek::Thu => "thu",
            DayOfWeek::Fri => "fri",
            DayOfWeek::Sat => "sat",
            DayOfWeek::Sun => "sun",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fixed 80-90 minute interval of the academic day, 1..8. Lesson 0 never
/// appears in a `Schedule`; it is dropped during parsing (see `parser`).
pub type Lesson = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "topic", rename_all = "lowercase")]
pub enum Topic {
    Virtual,
    Electricity,
    Mechanics,
    Optics,
    RigidBody,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Virtual => "virtual",
            Topic::Electricity => "electricity",
            Topic::Mechanics => "mechanics",
            Topic::Optics => "optics",
            Topic::RigidBody => "rigid_body",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "lab_type", rename_all = "lowercase")]
pub enum LabType {
    Defence,
    Performance,
}

impl LabType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabType::Defence => "defence",
            LabType::Performance => "performance",
        }
    }
}

impl fmt::Display for LabType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Teacher = String;

/// `DayOfWeek -> Lesson -> teachers assigned to that slot`.
pub type Schedule = BTreeMap<DayOfWeek, BTreeMap<Lesson, Vec<Teacher>>>;

/// A normalized lab-work time slot, produced by `SlotParser` from one upstream
/// master entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LabEvent {
    pub name: String,
    pub lab_type: LabType,
    pub topic: Topic,
    pub number: u8,
    pub auditorium: Option<i32>,
    pub spot: Option<i32>,
    pub schedule: Schedule,
}

/// User-owned matching criterion.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub subscription_uuid: Uuid,
    pub user_uuid: Uuid,
    pub lab_type: LabType,
    pub topic: Topic,
    pub number: i32,
    pub auditorium: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Per-user preferences consulted by `MatchEngine`.
#[derive(Debug, Clone)]
pub struct UserPreferences {
    pub time_preferences: BTreeMap<DayOfWeek, Vec<Lesson>>,
    pub blacklisted_teachers: Vec<Teacher>,
    pub successful_subscriptions: i32,
    pub last_successful_subscription: Option<DateTime<Utc>>,
}

/// Result of a `MatchEngine` lookup for one event: a subscription plus the
/// timeslots that caused it to match, ordered for fairness.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub user_uuid: Uuid,
    pub subscription_uuid: Uuid,
    pub successful_subscriptions: i32,
    pub last_successful_subscription: Option<DateTime<Utc>>,
    pub matching_timeslots: BTreeMap<DayOfWeek, Vec<Lesson>>,
}

/// 256-bit fingerprint over `(type, topic, number, auditorium, subscription, day, lesson)`,
/// used by the `Deduplicator` to suppress repeat notifications within a TTL window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(pub [u8; 32]);

impl DedupKey {
    pub fn as_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}
