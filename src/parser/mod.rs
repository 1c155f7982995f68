//! Maps raw `SlotPayload`s to normalized `LabEvent`s: regex extraction from master
//! names, plus timezone-aware time-to-lesson mapping.

use crate::config::ParserConfig;
use crate::model::{DayOfWeek, LabEvent, LabType, Lesson, Schedule, Topic};
use crate::slots::payload::{MasterInfo, SlotPayload};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// One lesson's local-time interval, in minutes since midnight (inclusive both ends).
const LESSON_TABLE: [(Lesson, u32, u32); 8] = [
    (1, 8 * 60 + 50, 10 * 60 + 20),
    (2, 10 * 60 + 35, 12 * 60 + 5),
    (3, 12 * 60 + 35, 14 * 60 + 5),
    (4, 14 * 60 + 15, 15 * 60 + 45),
    (5, 15 * 60 + 55, 17 * 60 + 20),
    (6, 17 * 60 + 30, 19 * 60),
    (7, 19 * 60 + 10, 20 * 60 + 30),
    (8, 20 * 60 + 40, 22 * 60),
];

#[derive(Debug, Error)]
pub enum ParserConfigError {
    #[error("invalid number_pattern: {0}")]
    NumberPattern(regex::Error),
    #[error("invalid auditorium_pattern: {0}")]
    AuditoriumPattern(regex::Error),
    #[error("invalid spot_pattern: {0}")]
    SpotPattern(regex::Error),
    #[error("invalid topic_pattern: {0}")]
    TopicPattern(regex::Error),
    #[error("unknown timezone: {0}")]
    Timezone(String),
    #[error("unknown default_type: {0}")]
    DefaultType(String),
}

#[derive(Debug, Error)]
pub enum ParseFieldError {
    #[error("lab number not found")]
    NumberNotFound,
    #[error("lab auditorium not found")]
    AuditoriumNotFound,
    #[error("topic not found")]
    TopicNotFound,
}

/// All masters that failed to parse, aggregated into one error (the slot is rejected
/// as a whole - see SPEC_FULL.md §4.4).
#[derive(Debug, Error)]
#[error("{} master(s) failed to parse: {}", .errors.len(), join_errors(.errors))]
pub struct SlotParseError {
    pub errors: Vec<ParseFieldError>,
}

fn join_errors(errors: &[ParseFieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn parse_lab_type(s: &str) -> Result<LabType, String> {
    match s {
        "defence" => Ok(LabType::Defence),
        "performance" => Ok(LabType::Performance),
        other => Err(other.to_string()),
    }
}

fn parse_topic(s: &str) -> Option<Topic> {
    match s {
        "virtual" => Some(Topic::Virtual),
        "electricity" => Some(Topic::Electricity),
        "mechanics" => Some(Topic::Mechanics),
        "optics" => Some(Topic::Optics),
        "rigid_body" => Some(Topic::RigidBody),
        _ => None,
    }
}

pub struct SlotParser {
    number_regex: Regex,
    auditorium_regex: Regex,
    spot_regex: Regex,
    topic_regex: Regex,
    name_prefix: String,
    timezone: Tz,
    topic_map: HashMap<String, Topic>,
    type_map: HashMap<String, LabType>,
    default_type: LabType,
}

impl SlotParser {
    pub fn new(cfg: &ParserConfig) -> Result<Self, ParserConfigError> {
        let number_regex =
            Regex::new(&cfg.number_pattern).map_err(ParserConfigError::NumberPattern)?;
        let auditorium_regex =
            Regex::new(&cfg.auditorium_pattern).map_err(ParserConfigError::AuditoriumPattern)?;
        let spot_regex = Regex::new(&cfg.spot_pattern).map_err(ParserConfigError::SpotPattern)?;
        let topic_regex = Regex::new(&cfg.topic_pattern).map_err(ParserConfigError::TopicPattern)?;

        let timezone: Tz = cfg
            .timezone
            .parse()
            .map_err(|_| ParserConfigError::Timezone(cfg.timezone.clone()))?;

        let mut topic_map = HashMap::new();
        for (k, v) in &cfg.topic_map {
            if let Some(topic) = parse_topic(v) {
                topic_map.insert(k.to_lowercase(), topic);
            }
        }

        let mut type_map = HashMap::new();
        for (k, v) in &cfg.type_map {
            if let Ok(lab_type) = parse_lab_type(v) {
                type_map.insert(k.clone(), lab_type);
            }
        }

        let default_type = parse_lab_type(&cfg.default_type)
            .map_err(ParserConfigError::DefaultType)?;

        Ok(Self {
            number_regex,
            auditorium_regex,
            spot_regex,
            topic_regex,
            name_prefix: cfg.name_prefix.clone(),
            timezone,
            topic_map,
            type_map,
            default_type,
        })
    }

    /// Produces zero or more `LabEvent`s from one slot payload. Empty `masters`
    /// yields zero events with no error. If any master fails to parse, the whole
    /// batch is rejected (§4.4's "all-or-nothing per slot" contract).
    pub fn parse_slot(&self, payload: &SlotPayload) -> Result<Vec<LabEvent>, SlotParseError> {
        let mut events = Vec::new();
        let mut errors = Vec::new();

        for (id, master) in &payload.data.masters.0 {
            let mut event = match self.parse_slot_info(master) {
                Ok(event) => event,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            if let Some(times) = payload.data.times.0.get(id) {
                event.schedule = self.build_schedule(times);
            }
            events.push(event);
        }

        if !errors.is_empty() {
            return Err(SlotParseError { errors });
        }

        Ok(events)
    }

    fn parse_slot_info(&self, master: &MasterInfo) -> Result<LabEvent, ParseFieldError> {
        let username = &master.username;
        let service_name = &master.service_name;

        let number = self.parse_number(username, service_name)?;
        let auditorium = self.parse_auditorium(username, service_name);
        let spot = self.parse_spot(username, service_name);
        let topic = self.parse_topic_field(username, service_name)?;
        let lab_type = self.parse_type(username, service_name);
        let name = self.parse_name(username);

        Ok(LabEvent {
            name,
            lab_type,
            topic,
            number,
            auditorium,
            spot,
            schedule: Schedule::new(),
        })
    }

    fn parse_name(&self, username: &str) -> String {
        let stripped = self.number_regex.replace_all(username, "");
        let stripped = self.auditorium_regex.replace_all(&stripped, "");
        let stripped = self.spot_regex.replace_all(&stripped, "");
        let stripped = stripped
            .strip_prefix(self.name_prefix.as_str())
            .unwrap_or(&stripped);
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn parse_number(&self, username: &str, service_name: &str) -> Result<u8, ParseFieldError> {
        first_capture(&self.number_regex, username)
            .or_else(|| first_capture(&self.number_regex, service_name))
            .and_then(|s| s.parse().ok())
            .ok_or(ParseFieldError::NumberNotFound)
    }

    fn parse_auditorium(&self, username: &str, service_name: &str) -> Option<i32> {
        first_capture(&self.auditorium_regex, username)
            .or_else(|| first_capture(&self.auditorium_regex, service_name))
            .and_then(|s| s.parse().ok())
    }

    fn parse_spot(&self, username: &str, service_name: &str) -> Option<i32> {
        first_capture(&self.spot_regex, username)
            .or_else(|| first_capture(&self.spot_regex, service_name))
            .and_then(|s| s.parse().ok())
    }

    fn parse_topic_field(&self, username: &str, service_name: &str) -> Result<Topic, ParseFieldError> {
        for haystack in [username, service_name] {
            if let Some(capture) = first_capture(&self.topic_regex, haystack) {
                if let Some(topic) = self.topic_map.get(&capture.to_lowercase()) {
                    return Ok(*topic);
                }
            }
        }
        Err(ParseFieldError::TopicNotFound)
    }

    fn parse_type(&self, username: &str, service_name: &str) -> LabType {
        for (keyword, lab_type) in &self.type_map {
            if username.contains(keyword.as_str()) || service_name.contains(keyword.as_str()) {
                return *lab_type;
            }
        }
        self.default_type
    }

    /// Every occupied `(day, lesson)` slot starts with an empty teacher list - upstream
    /// never reports teacher names per-slot, and an empty list is what lets the
    /// blacklist clause in the matching query treat the slot as unrestricted.
    fn build_schedule(&self, times: &[String]) -> Schedule {
        let mut schedule = Schedule::new();
        for time_str in times {
            match self.parse_time_string(time_str) {
                Some((_day, 0)) => {
                    tracing::warn!(time = %time_str, "no matching lesson interval, dropping timestamp");
                }
                Some((day, lesson)) => {
                    schedule.entry(day).or_default().entry(lesson).or_default();
                }
                None => {
                    tracing::warn!(time = %time_str, "failed to parse timestamp, dropping");
                }
            }
        }
        schedule
    }

    fn parse_time_string(&self, time_str: &str) -> Option<(DayOfWeek, Lesson)> {
        let naive = NaiveDateTime::parse_from_str(time_str, "%Y-%m-%d %H:%M:%S").ok()?;
        let local = naive.and_local_timezone(self.timezone).single()?;
        let day = DayOfWeek::from_chrono(local.weekday());
        let lesson = local_time_to_lesson(local.time());
        Some((day, lesson))
    }
}

fn first_capture<'a>(re: &Regex, haystack: &'a str) -> Option<&'a str> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Rounds minutes to the nearest multiple of 10 (carrying the hour on a 60 rollover),
/// then looks up the resulting minutes-since-midnight against `LESSON_TABLE`.
/// Returns 0 when no interval matches.
fn local_time_to_lesson(time: chrono::NaiveTime) -> Lesson {
    use chrono::Timelike;

    let minute = time.minute() as f64;
    let mut rounded_minute = ((minute / 10.0).round() as u32) * 10;
    let mut hour = time.hour();
    if rounded_minute == 60 {
        hour += 1;
        rounded_minute = 0;
    }

    let total_minutes = hour * 60 + rounded_minute;

    for (lesson, start, end) in LESSON_TABLE {
        if total_minutes >= start && total_minutes <= end {
            return lesson;
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn sample_config() -> ParserConfig {
        let mut topic_map = HashMap::new();
        topic_map.insert("virt".to_string(), "virtual".to_string());
        topic_map.insert("elec".to_string(), "electricity".to_string());
        topic_map.insert("mech".to_string(), "mechanics".to_string());
        topic_map.insert("opt".to_string(), "optics".to_string());
        topic_map.insert("solid".to_string(), "rigid_body".to_string());

        let mut type_map = HashMap::new();
        type_map.insert("perf".to_string(), "performance".to_string());

        ParserConfig {
            number_pattern: r"lab(\d+)".to_string(),
            auditorium_pattern: r"aud(\d+)".to_string(),
            spot_pattern: r"spot(\d+)".to_string(),
            topic_pattern: r"_(virt|elec|mech|opt|solid)_".to_string(),
            name_prefix: "A_".to_string(),
            timezone: "Europe/Moscow".to_string(),
            topic_map,
            type_map,
            default_type: "defence".to_string(),
        }
    }

    #[test]
    fn lesson_lookup_rounds_down_to_interval_end() {
        // 10:24 rounds to 10:20, the inclusive end of lesson 1's interval.
        assert_eq!(local_time_to_lesson(NaiveTime::from_hms_opt(10, 24, 0).unwrap()), 1);
    }

    #[test]
    fn lesson_lookup_rounds_up_into_next_interval() {
        // 10:36 rounds to 10:40, inside lesson 2's interval.
        assert_eq!(local_time_to_lesson(NaiveTime::from_hms_opt(10, 36, 0).unwrap()), 2);
    }

    #[test]
    fn lesson_lookup_carries_hour_on_sixty_rollover() {
        // 08:55 rounds to 09:00 (hour carried from the 60-minute rollover), which
        // still falls inside lesson 1's 08:50-10:20 interval.
        assert_eq!(local_time_to_lesson(NaiveTime::from_hms_opt(8, 55, 0).unwrap()), 1);
    }

    #[test]
    fn lesson_lookup_returns_zero_outside_any_interval() {
        assert_eq!(local_time_to_lesson(NaiveTime::from_hms_opt(3, 0, 0).unwrap()), 0);
    }

    #[test]
    fn parser_rejects_slot_when_any_master_missing_number() {
        let parser = SlotParser::new(&sample_config()).unwrap();
        let json = r#"{"data":{"masters":{
            "1":{"username":"A_lab1_aud101_virt_","service_name":""},
            "2":{"username":"A_aud101_virt_","service_name":""}
        },"dates_true":[],"times":[]}}"#;
        let payload: SlotPayload = serde_json::from_str(json).unwrap();
        let result = parser.parse_slot(&payload);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().errors.len(), 1);
    }

    #[test]
    fn parser_produces_no_events_for_empty_masters() {
        let parser = SlotParser::new(&sample_config()).unwrap();
        let json = r#"{"data":{"masters":[],"dates_true":[],"times":[]}}"#;
        let payload: SlotPayload = serde_json::from_str(json).unwrap();
        let events = parser.parse_slot(&payload).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn parser_extracts_fields_and_strips_name() {
        let parser = SlotParser::new(&sample_config()).unwrap();
        let json = r#"{"data":{"masters":{
            "5":{"username":"A_Ivanov lab1 _virt_","service_name":""}
        },"dates_true":[],"times":{"5":["2025-01-10 10:35:00"]}}}"#;
        let payload: SlotPayload = serde_json::from_str(json).unwrap();
        let events = parser.parse_slot(&payload).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.number, 1);
        assert_eq!(event.topic, Topic::Virtual);
        assert_eq!(event.name, "Ivanov _virt_");
        assert_eq!(event.lab_type, LabType::Defence);
        assert_eq!(event.auditorium, None);
        assert!(event.schedule[&DayOfWeek::Fri][&2].is_empty());
    }
}
