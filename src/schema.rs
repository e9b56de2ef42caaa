//! Business, schedule and alarm types shared by the extractor, the generator
//! and the HTTP layer.
//!
//! JSON field names are camelCase so that the payloads match what the web
//! client already consumes.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One open-to-close interval found on a line, both ends as `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

impl TimeWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// How a business closes during the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosingType {
    /// Closes at midday and reopens later.
    Midday,
    /// A single window; its end is the last closing of the day.
    Final,
    /// A single window longer than ten hours.
    Continuous,
}

/// One establishment detected in the OCR text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub id: String,
    pub name: String,
    pub address: String,
    /// Human readable join of the windows: `"09:00 - 14:00 / 17:00 - 20:30"`.
    pub schedule: String,
    pub closing_type: ClosingType,
    pub raw_line: String,
    /// Windows in the order they were found on the line.
    pub found_times: Vec<TimeWindow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmType {
    Midday,
    Final,
}

/// A scheduled trigger anchored to one closing edge of a business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    /// `<business id>-<closing time>-<window index>`.
    pub id: String,
    pub business_name: String,
    pub address: String,
    pub alarm_time: NaiveDateTime,
    pub closing_time: String,
    #[serde(rename = "type")]
    pub alarm_type: AlarmType,
    pub is_midday_closing: bool,
    pub active: bool,
}

impl Alarm {
    /// Key used to remember that this alarm already fired.
    pub fn fired_key(&self) -> String {
        format!("{}-{}", self.id, self.closing_time)
    }
}

/// The result of one scan: the text that was read and everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: String,
    pub source: String,
    pub content_hash: String,
    pub extracted_at: NaiveDateTime,
    pub text: String,
    pub businesses: Vec<Business>,
    pub alarms: Vec<Alarm>,
}

impl ScanRecord {
    pub fn new(source: String, text: String) -> Self {
        Self {
            id: format!("scan_{}", Uuid::new_v4().simple()),
            source,
            content_hash: content_hash(&text),
            extracted_at: Local::now().naive_local(),
            text,
            businesses: Vec::new(),
            alarms: Vec::new(),
        }
    }
}

/// SHA-256 of the recognized text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
