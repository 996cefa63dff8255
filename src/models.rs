use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Progression label carried by a learner record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearnerStatus {
    Learning,
    Engaged,
    Registered,
    Certified,
    #[serde(rename = "Multi-Certified")]
    MultiCertified,
    Specialist,
    Champion,
}

impl LearnerStatus {
    /// Parses the exact labels written by the export pipeline.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "Learning" => Some(Self::Learning),
            "Engaged" => Some(Self::Engaged),
            "Registered" => Some(Self::Registered),
            "Certified" => Some(Self::Certified),
            "Multi-Certified" => Some(Self::MultiCertified),
            "Specialist" => Some(Self::Specialist),
            "Champion" => Some(Self::Champion),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Learning => "Learning",
            Self::Engaged => "Engaged",
            Self::Registered => "Registered",
            Self::Certified => "Certified",
            Self::MultiCertified => "Multi-Certified",
            Self::Specialist => "Specialist",
            Self::Champion => "Champion",
        }
    }

    pub fn is_certified(self) -> bool {
        matches!(
            self,
            Self::Certified | Self::MultiCertified | Self::Specialist | Self::Champion
        )
    }
}

impl fmt::Display for LearnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearnerRecord {
    pub email: String,
    pub numeric_id: u64,
    pub handle: String,
    /// Raw label; unknown values are kept so derivations can decide what to drop.
    pub learner_status: String,
    pub journey_stage: String,
    pub total_certifications: u64,
    pub total_attempts: u64,
    pub certification_titles: Vec<String>,
    pub first_certification_date: Option<NaiveDate>,
    pub latest_certification_date: Option<NaiveDate>,
}

impl LearnerRecord {
    pub fn status(&self) -> Option<LearnerStatus> {
        LearnerStatus::parse(&self.learner_status)
    }

    pub fn is_certified(&self) -> bool {
        self.total_certifications > 0 || self.status().is_some_and(LearnerStatus::is_certified)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductUsageRecord {
    pub numeric_id: u64,
    pub learning_events: u64,
    pub learning_days: u64,
    pub copilot_events: u64,
    pub copilot_days: u64,
    pub actions_events: u64,
    pub actions_days: u64,
    pub security_events: u64,
    pub security_days: u64,
    pub total_usage_hours: f64,
}

impl ProductUsageRecord {
    pub fn total_active_days(&self) -> u64 {
        self.learning_days + self.copilot_days + self.actions_days + self.security_days
    }

    pub fn busiest_product_days(&self) -> u64 {
        self.learning_days
            .max(self.copilot_days)
            .max(self.actions_days)
            .max(self.security_days)
    }

    pub fn products_used(&self) -> u64 {
        [
            self.learning_events,
            self.copilot_events,
            self.actions_events,
            self.security_events,
        ]
        .iter()
        .filter(|events| **events > 0)
        .count() as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningActivityRecord {
    pub email: String,
    pub numeric_id: u64,
    pub page_views: u64,
    pub modules_completed: u64,
    pub learning_days: u64,
    pub last_activity: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JourneyRecord {
    pub email: String,
    pub numeric_id: u64,
    pub first_activity: Option<NaiveDate>,
    pub first_learning: Option<NaiveDate>,
    pub first_certification: Option<NaiveDate>,
    pub is_certified: bool,
    /// `Some` only for certified learners.
    pub days_to_certification: Option<u32>,
}

// ---------------------------------------------------------------------------
// Derived payloads. These are what the tiers serve, so they round-trip through
// the snapshot files and the live backend as camelCase JSON.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStage {
    pub stage: String,
    pub count: u64,
    pub percentage: u32,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropOff {
    pub from: String,
    pub to: String,
    pub drop_off_rate: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub total_learners: u64,
    pub certified_users: u64,
    pub learning_users: u64,
    pub total_certifications: u64,
    pub avg_certifications: f64,
    pub avg_usage_increase: f64,
    pub impact_score: u32,
    pub retention_rate: f64,
    #[serde(default)]
    pub status_breakdown: Vec<StatusCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImpact {
    pub product: String,
    pub avg_certified: f64,
    pub avg_all: f64,
    pub increase: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactReport {
    pub usage_increase: f64,
    pub retention_rate: f64,
    pub impact_score: u32,
    #[serde(default)]
    pub products: Vec<ProductImpact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCount {
    pub stage: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyReport {
    pub funnel: Vec<FunnelStage>,
    #[serde(default)]
    pub drop_off: Vec<DropOff>,
    pub avg_days_to_certification: Option<f64>,
    #[serde(default)]
    pub stage_distribution: Vec<StageCount>,
    pub avg_skill_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLearner {
    pub email: String,
    pub handle: String,
    pub certifications: u64,
    #[serde(default)]
    pub titles: Vec<String>,
    pub latest_certification: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLearnersReport {
    pub learners: Vec<TopLearner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDimensions {
    pub learning: f64,
    pub product_usage: f64,
    pub certification: f64,
    pub consistency: f64,
    pub growth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerSkill {
    pub email: String,
    pub handle: String,
    pub score: u32,
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCount {
    pub level: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsReport {
    pub weights: SkillDimensions,
    pub dimension_averages: SkillDimensions,
    pub average_score: f64,
    #[serde(default)]
    pub distribution: Vec<LevelCount>,
    #[serde(default)]
    pub top_learners: Vec<LearnerSkill>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementBucket {
    pub level: u8,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopilotInsightsReport {
    pub adopters: u64,
    pub total_events: u64,
    pub avg_days_certified: f64,
    pub avg_days_uncertified: f64,
    #[serde(default)]
    pub engagement: Vec<EngagementBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAdoption {
    pub product: String,
    pub active_users: u64,
    pub total_events: u64,
    pub total_days: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubActivityReport {
    pub products: Vec<ProductAdoption>,
    #[serde(default)]
    pub actions_engagement: Vec<EngagementBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub name: String,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub registrations: u64,
    #[serde(default)]
    pub attendees: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsReport {
    pub events: Vec<EventSummary>,
}

/// A payload tagged with the tier that produced it.
///
/// Serializes as the payload's own fields plus `"source"`, so renderers can
/// show provenance. `Error` is the terminal "run ingestion" condition and is
/// never a zero-filled success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Sourced<T> {
    Kusto(T),
    Aggregated(T),
    Enriched(T),
    Error { error: String, hint: String },
}

impl<T> Sourced<T> {
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            hint: "data not available, run the fetch and aggregate ingestion scripts".to_string(),
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Kusto(_) => "kusto",
            Self::Aggregated(_) => "aggregated",
            Self::Enriched(_) => "enriched",
            Self::Error { .. } => "error",
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Kusto(data) | Self::Aggregated(data) | Self::Enriched(data) => Some(data),
            Self::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for label in [
            "Learning",
            "Engaged",
            "Registered",
            "Certified",
            "Multi-Certified",
            "Specialist",
            "Champion",
        ] {
            let status = LearnerStatus::parse(label).expect("known label");
            assert_eq!(status.label(), label);
        }
        assert_eq!(LearnerStatus::parse("certified"), None);
    }

    #[test]
    fn sourced_payload_carries_source_tag() {
        let report = TopLearnersReport { learners: vec![] };
        let json = serde_json::to_value(Sourced::Aggregated(report)).unwrap();
        assert_eq!(json["source"], "aggregated");
        assert!(json["learners"].as_array().unwrap().is_empty());

        let missing: Sourced<TopLearnersReport> = Sourced::unavailable("no snapshot");
        let json = serde_json::to_value(&missing).unwrap();
        assert_eq!(json["source"], "error");
        assert_eq!(json["error"], "no snapshot");
        assert!(missing.data().is_none());
    }

    #[test]
    fn usage_helpers_count_products() {
        let usage = ProductUsageRecord {
            copilot_events: 12,
            copilot_days: 4,
            actions_events: 3,
            actions_days: 9,
            ..Default::default()
        };
        assert_eq!(usage.products_used(), 2);
        assert_eq!(usage.busiest_product_days(), 9);
        assert_eq!(usage.total_active_days(), 13);
    }
}
