//! Per-request choice between the live backend, snapshot files and a fresh
//! computation over the flat exports.
//!
//! Tiers are tried in `Tier::ORDER`. The first tier that serves wins; a tier
//! with nothing to offer steps aside; a tier that hits malformed input ends
//! the request with an `error`-tagged result.

use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{Availability, BackendError, HttpBackend, LiveBackend, AVAILABILITY_TTL};
use crate::cache::{Clock, SystemClock, TtlCache, CACHE_TTL};
use crate::config::Config;
use crate::metrics;
use crate::models::{
    CopilotInsightsReport, EventsReport, GithubActivityReport, ImpactReport, JourneyReport,
    MetricsReport, Sourced, SkillsReport, TopLearnersReport,
};
use crate::readers;
use crate::reconcile::{self, Dataset};
use crate::skills;

/// One snapshot file / backend endpoint per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum MetricFamily {
    Metrics,
    Impact,
    Journey,
    TopLearners,
    Skills,
    CopilotInsights,
    GithubActivity,
    Events,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 8] = [
        MetricFamily::Metrics,
        MetricFamily::Impact,
        MetricFamily::Journey,
        MetricFamily::TopLearners,
        MetricFamily::Skills,
        MetricFamily::CopilotInsights,
        MetricFamily::GithubActivity,
        MetricFamily::Events,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            MetricFamily::Metrics => "metrics",
            MetricFamily::Impact => "impact",
            MetricFamily::Journey => "journey",
            MetricFamily::TopLearners => "top-learners",
            MetricFamily::Skills => "skills",
            MetricFamily::CopilotInsights => "copilot-insights",
            MetricFamily::GithubActivity => "github-activity",
            MetricFamily::Events => "events",
        }
    }

    pub fn snapshot_file(self) -> String {
        format!("{}.json", self.slug())
    }
}

/// A payload the tiers can serve.
pub trait Family: Serialize + DeserializeOwned + Send + Sync + 'static {
    const FAMILY: MetricFamily;

    /// Computes the payload from flat exports, or `None` when no flat-file
    /// source exists for this family.
    fn derive(dataset: &Dataset, config: &Config) -> Option<Self>;
}

impl Family for MetricsReport {
    const FAMILY: MetricFamily = MetricFamily::Metrics;
    fn derive(dataset: &Dataset, _config: &Config) -> Option<Self> {
        Some(metrics::metrics_report(dataset))
    }
}

impl Family for ImpactReport {
    const FAMILY: MetricFamily = MetricFamily::Impact;
    fn derive(dataset: &Dataset, _config: &Config) -> Option<Self> {
        Some(metrics::impact_report(dataset))
    }
}

impl Family for JourneyReport {
    const FAMILY: MetricFamily = MetricFamily::Journey;
    fn derive(dataset: &Dataset, config: &Config) -> Option<Self> {
        Some(metrics::journey_report(dataset, &config.skill_weights))
    }
}

impl Family for TopLearnersReport {
    const FAMILY: MetricFamily = MetricFamily::TopLearners;
    fn derive(dataset: &Dataset, _config: &Config) -> Option<Self> {
        Some(metrics::top_learners_report(dataset))
    }
}

impl Family for SkillsReport {
    const FAMILY: MetricFamily = MetricFamily::Skills;
    fn derive(dataset: &Dataset, config: &Config) -> Option<Self> {
        Some(skills::skills_report(dataset, config.skill_weights))
    }
}

impl Family for CopilotInsightsReport {
    const FAMILY: MetricFamily = MetricFamily::CopilotInsights;
    fn derive(dataset: &Dataset, _config: &Config) -> Option<Self> {
        Some(metrics::copilot_insights_report(dataset))
    }
}

impl Family for GithubActivityReport {
    const FAMILY: MetricFamily = MetricFamily::GithubActivity;
    fn derive(dataset: &Dataset, _config: &Config) -> Option<Self> {
        Some(metrics::github_activity_report(dataset))
    }
}

impl Family for EventsReport {
    const FAMILY: MetricFamily = MetricFamily::Events;
    fn derive(_dataset: &Dataset, _config: &Config) -> Option<Self> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Live,
    Snapshot,
    Raw,
}

impl Tier {
    pub const ORDER: [Tier; 3] = [Tier::Live, Tier::Snapshot, Tier::Raw];

    fn name(self) -> &'static str {
        match self {
            Tier::Live => "live",
            Tier::Snapshot => "snapshot",
            Tier::Raw => "raw",
        }
    }
}

enum TierOutcome<T> {
    Served(Sourced<T>),
    /// Nothing to offer; try the next tier.
    Skip(String),
    /// Malformed input; stop here.
    Fault(String),
}

/// Process-scoped mutable state shared by every request.
pub struct AnalyticsState {
    datasets: TtlCache<PathBuf, Dataset>,
    snapshots: TtlCache<PathBuf, Value>,
    availability: Availability,
}

impl AnalyticsState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            datasets: TtlCache::new(CACHE_TTL, clock.clone()),
            snapshots: TtlCache::new(CACHE_TTL, clock.clone()),
            availability: Availability::new(AVAILABILITY_TTL, clock),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputStatus {
    pub name: String,
    pub present: bool,
}

/// What each tier could currently serve.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierStatus {
    pub backend_configured: bool,
    pub backend_available: Option<bool>,
    pub snapshots: Vec<InputStatus>,
    pub raw_inputs: Vec<InputStatus>,
}

/// Result of a custom backend query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub result: Value,
}

pub struct AnalyticsService {
    config: Config,
    backend: Option<Arc<dyn LiveBackend>>,
    state: AnalyticsState,
}

impl AnalyticsService {
    pub fn new(
        config: Config,
        backend: Option<Arc<dyn LiveBackend>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            backend,
            state: AnalyticsState::new(clock),
        }
    }

    /// Builds the service with an HTTP backend when one is configured.
    pub fn from_config(config: Config) -> Result<Self, BackendError> {
        let backend = match &config.backend_url {
            Some(url) => {
                let client = HttpBackend::new(url, config.backend_timeout)?;
                Some(Arc::new(client) as Arc<dyn LiveBackend>)
            }
            None => None,
        };
        Ok(Self::new(config, backend, Arc::new(SystemClock)))
    }

    pub async fn fetch<T: Family>(&self) -> Sourced<T> {
        let family = T::FAMILY.slug();
        let mut skipped = Vec::new();

        for tier in Tier::ORDER {
            let outcome = match tier {
                Tier::Live => self.from_backend::<T>().await,
                Tier::Snapshot => self.from_snapshot::<T>(),
                Tier::Raw => self.from_flat_files::<T>(),
            };

            match outcome {
                TierOutcome::Served(served) => {
                    tracing::info!(family, tier = tier.name(), source = served.source(), "served");
                    return served;
                }
                TierOutcome::Skip(reason) => {
                    tracing::debug!(family, tier = tier.name(), %reason, "tier skipped");
                    skipped.push(format!("{}: {}", tier.name(), reason));
                }
                TierOutcome::Fault(error) => {
                    tracing::error!(family, tier = tier.name(), %error, "tier failed");
                    return Sourced::unavailable(error);
                }
            }
        }

        tracing::warn!(family, "no tier could serve the request");
        Sourced::unavailable(format!("{family} unavailable ({})", skipped.join("; ")))
    }

    async fn from_backend<T: Family>(&self) -> TierOutcome<T> {
        let Some(backend) = &self.backend else {
            return TierOutcome::Skip("no backend configured".to_string());
        };
        if !self.state.availability.check(backend.as_ref()).await {
            return TierOutcome::Skip("backend unavailable".to_string());
        }

        let value = match backend.fetch(T::FAMILY.slug()).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "backend call failed, falling back");
                self.state.availability.record(false);
                return TierOutcome::Skip(err.to_string());
            }
        };

        match serde_json::from_value::<T>(value) {
            Ok(payload) => TierOutcome::Served(Sourced::Kusto(payload)),
            Err(err) => {
                tracing::warn!(error = %err, "backend payload has unexpected shape");
                TierOutcome::Skip(format!("undecodable backend payload: {err}"))
            }
        }
    }

    fn from_snapshot<T: Family>(&self) -> TierOutcome<T> {
        let path = self.config.aggregated_dir.join(T::FAMILY.snapshot_file());

        let value = match self.state.snapshots.get(&path) {
            Some(value) => value,
            None => match readers::read_json(&path) {
                Ok(Some(value)) => {
                    let value = Arc::new(value);
                    self.state.snapshots.set(path.clone(), Arc::clone(&value));
                    value
                }
                Ok(None) => {
                    return TierOutcome::Skip(format!("{} not found", path.display()));
                }
                Err(err) => return TierOutcome::Fault(err.to_string()),
            },
        };

        match T::deserialize(value.as_ref()) {
            Ok(payload) => TierOutcome::Served(Sourced::Aggregated(payload)),
            Err(err) => TierOutcome::Fault(format!("malformed snapshot {}: {err}", path.display())),
        }
    }

    fn dataset(&self) -> crate::error::Result<Option<Arc<Dataset>>> {
        let key = self.config.data_dir.clone();
        if let Some(dataset) = self.state.datasets.get(&key) {
            return Ok(Some(dataset));
        }

        let Some(dataset) = reconcile::load_dataset(&self.config.data_dir)? else {
            return Ok(None);
        };
        let dataset = Arc::new(dataset);
        self.state.datasets.set(key, Arc::clone(&dataset));
        Ok(Some(dataset))
    }

    fn from_flat_files<T: Family>(&self) -> TierOutcome<T> {
        let dataset = match self.dataset() {
            Ok(Some(dataset)) => dataset,
            Ok(None) => {
                return TierOutcome::Skip(format!(
                    "no learner exports in {}",
                    self.config.data_dir.display()
                ))
            }
            Err(err) => return TierOutcome::Fault(err.to_string()),
        };

        match T::derive(&dataset, &self.config) {
            Some(payload) => TierOutcome::Served(Sourced::Enriched(payload)),
            None => TierOutcome::Skip("no flat-file source for this family".to_string()),
        }
    }

    /// Runs a custom query. Only the live backend can answer these.
    pub async fn custom_query(&self, body: &Value) -> Sourced<QueryResult> {
        let Some(backend) = &self.backend else {
            return Sourced::unavailable("custom queries need a configured backend");
        };
        if !self.state.availability.check(backend.as_ref()).await {
            return Sourced::unavailable("analytics backend unavailable");
        }
        match backend.query(body).await {
            Ok(result) => Sourced::Kusto(QueryResult { result }),
            Err(err) => {
                self.state.availability.record(false);
                Sourced::unavailable(err.to_string())
            }
        }
    }

    pub async fn status(&self) -> TierStatus {
        let backend_available = match &self.backend {
            Some(backend) => Some(self.state.availability.check(backend.as_ref()).await),
            None => None,
        };

        let snapshots = MetricFamily::ALL
            .iter()
            .map(|family| InputStatus {
                name: family.snapshot_file(),
                present: self.config.aggregated_dir.join(family.snapshot_file()).is_file(),
            })
            .collect();

        let raw_inputs = [
            reconcile::CERTIFIED_USERS,
            reconcile::UNIFIED_USERS,
            reconcile::PRODUCT_USAGE,
            reconcile::LEARNING_ACTIVITY,
            reconcile::JOURNEY_COMPLETE,
        ]
        .iter()
        .map(|stem| {
            let dir = &self.config.data_dir;
            InputStatus {
                name: stem.to_string(),
                present: dir.join(format!("{stem}.csv")).is_file()
                    || dir.join(format!("{stem}.json")).is_file(),
            }
        })
        .collect();

        TierStatus {
            backend_configured: self.backend.is_some(),
            backend_available,
            snapshots,
            raw_inputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBackend {
        healthy: bool,
        payloads: HashMap<String, Value>,
        health_probes: AtomicUsize,
    }

    #[async_trait]
    impl LiveBackend for FakeBackend {
        async fn health(&self) -> Result<(), BackendError> {
            self.health_probes.fetch_add(1, Ordering::SeqCst);
            if self.healthy {
                Ok(())
            } else {
                Err(BackendError::Network("connection refused".to_string()))
            }
        }

        async fn fetch(&self, endpoint: &str) -> Result<Value, BackendError> {
            self.payloads
                .get(endpoint)
                .cloned()
                .ok_or(BackendError::Status(500))
        }

        async fn query(&self, body: &Value) -> Result<Value, BackendError> {
            Ok(json!({ "echo": body }))
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        config: Config,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let data_dir = root.path().join("data");
            let aggregated_dir = data_dir.join("aggregated");
            std::fs::create_dir_all(&aggregated_dir).unwrap();
            let config = Config {
                data_dir,
                aggregated_dir,
                ..Config::default()
            };
            Self {
                _root: root,
                config,
                clock: Arc::new(ManualClock::new()),
            }
        }

        fn write_csv_exports(&self) {
            write(
                &self.config.data_dir.join("certified_users.csv"),
                "email,dotcom_id,user_handle,learner_status,total_certs,cert_titles,latest_cert_date\n\
                 avery@x.com,1,avery,Certified,1,\"['GitHub Actions']\",2024-05-01\n\
                 jules@x.com,2,jules,Champion,4,\"['GitHub Actions', 'GitHub Admin']\",2024-06-01\n",
            );
            write(
                &self.config.data_dir.join("unified_users.csv"),
                "email,dotcom_id,user_handle,learner_status,total_certs\n\
                 avery@x.com,1,avery,Learning,0\n\
                 kiara@x.com,3,kiara,Learning,0\n",
            );
            write(
                &self.config.data_dir.join("product_usage.csv"),
                "dotcom_id,copilot_events,copilot_days,actions_events,actions_days\n\
                 1,40,6,0,0\n\
                 2,300,22,80,19\n",
            );
        }

        fn write_snapshot(&self, family: MetricFamily, body: &str) {
            write(&self.config.aggregated_dir.join(family.snapshot_file()), body);
        }

        fn service(&self, backend: Option<Arc<dyn LiveBackend>>) -> AnalyticsService {
            AnalyticsService::new(self.config.clone(), backend, self.clock.clone())
        }
    }

    fn write(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
    }

    fn down_backend() -> Arc<FakeBackend> {
        Arc::new(FakeBackend::default())
    }

    const METRICS_SNAPSHOT: &str = r#"{
        "totalLearners": 1200,
        "certifiedUsers": 300,
        "learningUsers": 900,
        "totalCertifications": 410,
        "avgCertifications": 1.37,
        "avgUsageIncrease": 42.0,
        "impactScore": 61,
        "retentionRate": 80.5
    }"#;

    #[tokio::test]
    async fn backend_down_with_snapshot_serves_aggregated() {
        let fixture = Fixture::new();
        fixture.write_snapshot(MetricFamily::Metrics, METRICS_SNAPSHOT);
        fixture.write_csv_exports();
        let service = fixture.service(Some(down_backend()));

        let served = service.fetch::<MetricsReport>().await;
        assert_eq!(served.source(), "aggregated");
        assert_eq!(served.data().unwrap().total_learners, 1200);
    }

    #[tokio::test]
    async fn backend_and_snapshot_missing_computes_from_exports() {
        let fixture = Fixture::new();
        fixture.write_csv_exports();
        let service = fixture.service(Some(down_backend()));

        let served = service.fetch::<MetricsReport>().await;
        assert_eq!(served.source(), "enriched");
        let report = served.data().unwrap();
        assert_eq!(report.total_learners, 3);
        assert_eq!(report.certified_users, 2);

        let top = service.fetch::<TopLearnersReport>().await;
        assert_eq!(top.data().unwrap().learners[0].email, "jules@x.com");

        let json = serde_json::to_value(&served).unwrap();
        assert_eq!(json["source"], "enriched");
    }

    #[tokio::test]
    async fn nothing_available_is_an_error_not_zeroes() {
        let fixture = Fixture::new();
        let service = fixture.service(Some(down_backend()));

        let served = service.fetch::<MetricsReport>().await;
        assert_eq!(served.source(), "error");
        assert!(served.data().is_none());
        match served {
            Sourced::Error { error, hint } => {
                assert!(error.contains("no learner exports"));
                assert!(hint.contains("ingestion"));
            }
            other => panic!("expected error, got {}", other.source()),
        }
    }

    #[tokio::test]
    async fn healthy_backend_wins() {
        let fixture = Fixture::new();
        fixture.write_snapshot(MetricFamily::Metrics, METRICS_SNAPSHOT);
        let mut backend = FakeBackend {
            healthy: true,
            ..Default::default()
        };
        let mut live: Value = serde_json::from_str(METRICS_SNAPSHOT).unwrap();
        live["totalLearners"] = json!(1500);
        backend.payloads.insert("metrics".to_string(), live);
        let service = fixture.service(Some(Arc::new(backend)));

        let served = service.fetch::<MetricsReport>().await;
        assert_eq!(served.source(), "kusto");
        assert_eq!(served.data().unwrap().total_learners, 1500);
    }

    #[tokio::test]
    async fn failed_backend_call_falls_back_and_is_remembered() {
        let fixture = Fixture::new();
        fixture.write_snapshot(MetricFamily::Metrics, METRICS_SNAPSHOT);
        let backend = Arc::new(FakeBackend {
            healthy: true,
            ..Default::default()
        });
        let service = fixture.service(Some(backend.clone()));

        // Healthy probe, but the endpoint answers 500.
        assert_eq!(service.fetch::<MetricsReport>().await.source(), "aggregated");
        assert_eq!(service.fetch::<MetricsReport>().await.source(), "aggregated");
        assert_eq!(backend.health_probes.load(Ordering::SeqCst), 1);

        fixture.clock.advance(Duration::from_secs(30));
        service.fetch::<MetricsReport>().await;
        assert_eq!(backend.health_probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_snapshot_stops_the_chain() {
        let fixture = Fixture::new();
        fixture.write_snapshot(MetricFamily::Metrics, "{ \"totalLearners\": ");
        fixture.write_csv_exports();
        let service = fixture.service(None);

        let served = service.fetch::<MetricsReport>().await;
        assert_eq!(served.source(), "error");
    }

    #[tokio::test]
    async fn ragged_export_is_an_error_not_a_computation() {
        let fixture = Fixture::new();
        write(
            &fixture.config.data_dir.join("certified_users.csv"),
            "email,dotcom_id,learner_status,total_certs\n\
             avery@x.com,1,Certified,1\n\
             jules@x.com,2,Champion,4,EXTRA,MORE\n",
        );
        let service = fixture.service(None);

        let served = service.fetch::<MetricsReport>().await;
        assert_eq!(served.source(), "error");
        assert!(served.data().is_none());
    }

    #[tokio::test]
    async fn events_have_no_flat_file_source() {
        let fixture = Fixture::new();
        fixture.write_csv_exports();
        let service = fixture.service(None);
        assert_eq!(service.fetch::<EventsReport>().await.source(), "error");

        fixture.write_snapshot(
            MetricFamily::Events,
            r#"{"events": [{"name": "Certification Bootcamp", "date": "2024-09-12", "registrations": 140, "attendees": 95}]}"#,
        );
        let served = service.fetch::<EventsReport>().await;
        assert_eq!(served.source(), "aggregated");
        assert_eq!(served.data().unwrap().events[0].attendees, 95);
    }

    #[tokio::test]
    async fn computed_dataset_is_cached_for_five_minutes() {
        let fixture = Fixture::new();
        fixture.write_csv_exports();
        let service = fixture.service(None);
        assert_eq!(service.fetch::<MetricsReport>().await.source(), "enriched");

        std::fs::remove_file(fixture.config.data_dir.join("certified_users.csv")).unwrap();
        std::fs::remove_file(fixture.config.data_dir.join("unified_users.csv")).unwrap();
        fixture.clock.advance(Duration::from_secs(299));
        assert_eq!(service.fetch::<MetricsReport>().await.source(), "enriched");

        fixture.clock.advance(Duration::from_secs(1));
        assert_eq!(service.fetch::<MetricsReport>().await.source(), "error");
    }

    #[tokio::test]
    async fn custom_query_needs_backend() {
        let fixture = Fixture::new();
        let offline = fixture.service(None);
        assert_eq!(offline.custom_query(&json!({"q": "x"})).await.source(), "error");

        let online = fixture.service(Some(Arc::new(FakeBackend {
            healthy: true,
            ..Default::default()
        })));
        let served = online.custom_query(&json!({"q": "x"})).await;
        assert_eq!(served.source(), "kusto");
        assert_eq!(served.data().unwrap().result["echo"]["q"], "x");
    }

    #[tokio::test]
    async fn status_lists_present_inputs() {
        let fixture = Fixture::new();
        fixture.write_csv_exports();
        fixture.write_snapshot(MetricFamily::Skills, "{}");
        let status = fixture.service(None).status().await;

        assert!(!status.backend_configured);
        assert!(status.backend_available.is_none());
        let present: Vec<&str> = status
            .raw_inputs
            .iter()
            .filter(|i| i.present)
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(present, vec!["certified_users", "unified_users", "product_usage"]);
        assert!(status.snapshots.iter().any(|s| s.name == "skills.json" && s.present));
    }
}
