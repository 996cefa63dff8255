//! Export row types and their conversion to normalized records.
//!
//! The export pipeline writes Python-flavoured cells: `"True"`/`"False"`
//! booleans, `"['A', 'B']"` lists, blank numerics. Every coercion here has a
//! fixed fallback so nothing undefined reaches the arithmetic.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::{JourneyRecord, LearnerRecord, LearningActivityRecord, ProductUsageRecord};

/// Hours credited per active product day when deriving total usage.
pub const HOURS_PER_ACTIVE_DAY: f64 = 0.5;

/// Exact integers pass through untouched; anything else goes through `f64`
/// and is truncated.
pub fn coerce_u64(value: Option<&Value>) -> u64 {
    let number = match value {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(exact) => return exact,
            None => n.as_f64(),
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            if let Ok(exact) = s.parse::<u64>() {
                return exact;
            }
            s.parse::<f64>().ok()
        }
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() && n > 0.0 => n.trunc() as u64,
        _ => 0,
    }
}

/// Native booleans, or the exact strings `"True"` / `"False"`.
pub fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "True",
        _ => false,
    }
}

pub fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Parses a bracketed list literal such as `['Actions', "Admin"]`.
///
/// Anything not wrapped in brackets is treated as malformed and yields an
/// empty list.
pub fn parse_list_literal(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return Vec::new();
    };

    inner
        .split(',')
        .map(|item| {
            item.trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .trim()
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

pub fn coerce_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => parse_list_literal(s),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| coerce_string(Some(item)))
            .filter(|item| !item.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

pub fn coerce_date(value: Option<&Value>) -> Option<NaiveDate> {
    let Some(Value::String(raw)) = value else {
        return None;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Value::deserialize(deserializer).map(|value| coerce_u64(Some(&value)))
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Value::deserialize(deserializer).map(|value| coerce_bool(Some(&value)))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Value::deserialize(deserializer).map(|value| coerce_string(Some(&value)))
}

fn lenient_email<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    lenient_string(deserializer).map(|raw| normalize_email(&raw))
}

fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Value::deserialize(deserializer).map(|value| coerce_list(Some(&value)))
}

fn lenient_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<NaiveDate>, D::Error> {
    Value::deserialize(deserializer).map(|value| coerce_date(Some(&value)))
}

/// Row from `certified_users` or `unified_users`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LearnerRow {
    #[serde(deserialize_with = "lenient_email")]
    email: String,
    #[serde(deserialize_with = "lenient_u64")]
    dotcom_id: u64,
    #[serde(deserialize_with = "lenient_string")]
    user_handle: String,
    #[serde(deserialize_with = "lenient_string")]
    learner_status: String,
    #[serde(deserialize_with = "lenient_string")]
    journey_stage: String,
    #[serde(deserialize_with = "lenient_u64")]
    total_certs: u64,
    #[serde(deserialize_with = "lenient_u64")]
    total_attempts: u64,
    #[serde(deserialize_with = "lenient_list")]
    cert_titles: Vec<String>,
    #[serde(deserialize_with = "lenient_date")]
    first_cert_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_date")]
    latest_cert_date: Option<NaiveDate>,
}

impl From<LearnerRow> for LearnerRecord {
    fn from(row: LearnerRow) -> Self {
        Self {
            email: row.email,
            numeric_id: row.dotcom_id,
            handle: row.user_handle,
            learner_status: row.learner_status,
            journey_stage: row.journey_stage,
            total_certifications: row.total_certs,
            total_attempts: row.total_attempts,
            certification_titles: row.cert_titles,
            first_certification_date: row.first_cert_date,
            latest_certification_date: row.latest_cert_date,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UsageRow {
    #[serde(deserialize_with = "lenient_u64")]
    dotcom_id: u64,
    #[serde(deserialize_with = "lenient_u64")]
    learning_events: u64,
    #[serde(deserialize_with = "lenient_u64")]
    learning_days: u64,
    #[serde(deserialize_with = "lenient_u64")]
    copilot_events: u64,
    #[serde(deserialize_with = "lenient_u64")]
    copilot_days: u64,
    #[serde(deserialize_with = "lenient_u64")]
    actions_events: u64,
    #[serde(deserialize_with = "lenient_u64")]
    actions_days: u64,
    #[serde(deserialize_with = "lenient_u64")]
    security_events: u64,
    #[serde(deserialize_with = "lenient_u64")]
    security_days: u64,
}

impl From<UsageRow> for ProductUsageRecord {
    fn from(row: UsageRow) -> Self {
        let mut usage = ProductUsageRecord {
            numeric_id: row.dotcom_id,
            learning_events: row.learning_events,
            learning_days: row.learning_days,
            copilot_events: row.copilot_events,
            copilot_days: row.copilot_days,
            actions_events: row.actions_events,
            actions_days: row.actions_days,
            security_events: row.security_events,
            security_days: row.security_days,
            total_usage_hours: 0.0,
        };
        let hours = usage.total_active_days() as f64 * HOURS_PER_ACTIVE_DAY;
        usage.total_usage_hours = (hours * 10.0).round() / 10.0;
        usage
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActivityRow {
    #[serde(deserialize_with = "lenient_email")]
    email: String,
    #[serde(deserialize_with = "lenient_u64")]
    dotcom_id: u64,
    #[serde(deserialize_with = "lenient_u64")]
    page_views: u64,
    #[serde(deserialize_with = "lenient_u64")]
    modules_completed: u64,
    #[serde(deserialize_with = "lenient_u64")]
    learning_days: u64,
    #[serde(deserialize_with = "lenient_date")]
    last_activity_date: Option<NaiveDate>,
}

impl From<ActivityRow> for LearningActivityRecord {
    fn from(row: ActivityRow) -> Self {
        Self {
            email: row.email,
            numeric_id: row.dotcom_id,
            page_views: row.page_views,
            modules_completed: row.modules_completed,
            learning_days: row.learning_days,
            last_activity: row.last_activity_date,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JourneyRow {
    #[serde(deserialize_with = "lenient_email")]
    email: String,
    #[serde(deserialize_with = "lenient_u64")]
    dotcom_id: u64,
    #[serde(deserialize_with = "lenient_date")]
    first_activity_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_date")]
    first_learning_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_date")]
    first_cert_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_bool")]
    is_certified: bool,
    #[serde(deserialize_with = "lenient_u64")]
    days_to_certification: u64,
}

impl From<JourneyRow> for JourneyRecord {
    fn from(row: JourneyRow) -> Self {
        let days_to_certification = row
            .is_certified
            .then(|| u32::try_from(row.days_to_certification).unwrap_or(u32::MAX));

        Self {
            email: row.email,
            numeric_id: row.dotcom_id,
            first_activity: row.first_activity_date,
            first_learning: row.first_learning_date,
            first_certification: row.first_cert_date,
            is_certified: row.is_certified,
            days_to_certification,
        }
    }
}
