//! Dashboard metric derivations over the reconciled learner set.
//!
//! Everything here is a pure function of borrowed input. Zero denominators
//! resolve to fixed substitutes rather than NaN or infinity.

use std::collections::{HashMap, HashSet};

use crate::engagement;
use crate::models::{
    CopilotInsightsReport, DropOff, FunnelStage, GithubActivityReport, ImpactReport,
    JourneyReport, LearnerRecord, LearnerStatus, MetricsReport, ProductAdoption, ProductImpact,
    ProductUsageRecord, StageCount, StatusCount, TopLearner, TopLearnersReport,
};
use crate::reconcile::Dataset;
use crate::skills::{self, SkillWeights};

/// Funnel buckets in display order, with their chart colors.
pub const FUNNEL_BUCKETS: [(LearnerStatus, &str); 5] = [
    (LearnerStatus::Learning, "#3b82f6"),
    (LearnerStatus::Certified, "#22c55e"),
    (LearnerStatus::MultiCertified, "#a855f7"),
    (LearnerStatus::Specialist, "#f59e0b"),
    (LearnerStatus::Champion, "#ef4444"),
];

const CERTIFIED_WEIGHT: f64 = 30.0;
const USAGE_WEIGHT: f64 = 0.4;
const RETENTION_WEIGHT: f64 = 0.3;
const TOP_LEARNERS: usize = 10;

fn bucket_index(learner: &LearnerRecord) -> Option<usize> {
    let status = learner.status()?;
    FUNNEL_BUCKETS.iter().position(|(bucket, _)| *bucket == status)
}

fn percent(count: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    (count as f64 / total as f64 * 100.0).round() as u32
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Counts learners into the five funnel buckets.
///
/// Statuses outside the buckets (including `Engaged` and `Registered`) are
/// dropped, not lumped into an "other" stage. Stages are parallel cohorts,
/// so counts are not guaranteed to shrink along the sequence.
pub fn compute_funnel(learners: &[LearnerRecord]) -> Vec<FunnelStage> {
    let mut counts = [0u64; FUNNEL_BUCKETS.len()];
    for learner in learners {
        match bucket_index(learner) {
            Some(index) => counts[index] += 1,
            None => tracing::debug!(
                email = %learner.email,
                status = %learner.learner_status,
                "status outside funnel buckets, not counted"
            ),
        }
    }

    let total: u64 = counts.iter().sum();
    FUNNEL_BUCKETS
        .iter()
        .zip(counts)
        .map(|((status, color), count)| FunnelStage {
            stage: status.label().to_string(),
            count,
            percentage: percent(count, total),
            color: color.to_string(),
        })
        .collect()
}

/// Bucket counts across several source collections, each email counted once.
///
/// Unlike the funnel, a learner present in more than one collection lands in
/// the bucket of the first collection that lists them.
pub fn status_breakdown(collections: &[&[LearnerRecord]]) -> Vec<StatusCount> {
    let mut counted: HashSet<&str> = HashSet::new();
    let mut counts = [0u64; FUNNEL_BUCKETS.len()];

    for learner in collections.iter().flat_map(|c| c.iter()) {
        if counted.contains(learner.email.as_str()) {
            continue;
        }
        if let Some(index) = bucket_index(learner) {
            counted.insert(learner.email.as_str());
            counts[index] += 1;
        }
    }

    FUNNEL_BUCKETS
        .iter()
        .zip(counts)
        .map(|((status, _), count)| StatusCount {
            status: status.label().to_string(),
            count,
        })
        .collect()
}

/// Percentage lost between each pair of adjacent stages. Negative when a
/// later stage is larger; 0 when the earlier stage is empty.
pub fn drop_off(stages: &[FunnelStage]) -> Vec<DropOff> {
    stages
        .windows(2)
        .map(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            let rate = if a.count == 0 {
                0
            } else {
                ((a.count as f64 - b.count as f64) / a.count as f64 * 100.0).round() as i64
            };
            DropOff {
                from: a.stage.clone(),
                to: b.stage.clone(),
                drop_off_rate: rate,
            }
        })
        .collect()
}

/// Relative difference between the certified cohort's mean and the whole
/// population's mean, in percent.
///
/// An empty or all-zero population uses 1 as its mean so the result stays
/// defined.
pub fn usage_increase(all: &[f64], certified: &[f64]) -> f64 {
    let mean_all = match mean(all) {
        m if m == 0.0 => 1.0,
        m => m,
    };
    round1((mean(certified) - mean_all) / mean_all * 100.0)
}

pub fn impact_score(certified_fraction: f64, usage_increase: f64, retention_rate: f64) -> u32 {
    let composite = certified_fraction.clamp(0.0, 1.0) * CERTIFIED_WEIGHT
        + usage_increase.clamp(0.0, 100.0) * USAGE_WEIGHT
        + retention_rate.clamp(0.0, 100.0) * RETENTION_WEIGHT;
    (composite.round() as u32).min(100)
}

/// Share of certified learners still showing product activity, in percent.
pub fn retention_rate(dataset: &Dataset) -> f64 {
    let certified: Vec<&LearnerRecord> =
        dataset.learners.iter().filter(|l| l.is_certified()).collect();
    if certified.is_empty() {
        return 0.0;
    }
    let retained = certified
        .iter()
        .filter(|l| dataset.usage_for(l).total_active_days() > 0)
        .count();
    round1(retained as f64 / certified.len() as f64 * 100.0)
}

fn usage_split<F>(dataset: &Dataset, field: F) -> (Vec<f64>, Vec<f64>)
where
    F: Fn(&ProductUsageRecord) -> f64,
{
    let mut all = Vec::with_capacity(dataset.learners.len());
    let mut certified = Vec::new();
    for learner in &dataset.learners {
        let value = field(dataset.usage_for(learner));
        all.push(value);
        if learner.is_certified() {
            certified.push(value);
        }
    }
    (all, certified)
}

fn certified_fraction(dataset: &Dataset) -> f64 {
    if dataset.learners.is_empty() {
        return 0.0;
    }
    let certified = dataset.learners.iter().filter(|l| l.is_certified()).count();
    certified as f64 / dataset.learners.len() as f64
}

pub fn metrics_report(dataset: &Dataset) -> MetricsReport {
    let learners = &dataset.learners;
    let certified: Vec<&LearnerRecord> = learners.iter().filter(|l| l.is_certified()).collect();
    let total_certifications: u64 = learners.iter().map(|l| l.total_certifications).sum();
    let learning_users = learners
        .iter()
        .filter(|l| l.status() == Some(LearnerStatus::Learning))
        .count() as u64;

    let (all_hours, certified_hours) = usage_split(dataset, |u| u.total_usage_hours);
    let increase = usage_increase(&all_hours, &certified_hours);
    let retention = retention_rate(dataset);

    MetricsReport {
        total_learners: learners.len() as u64,
        certified_users: certified.len() as u64,
        learning_users,
        total_certifications,
        avg_certifications: if certified.is_empty() {
            0.0
        } else {
            let certs: u64 = certified.iter().map(|l| l.total_certifications).sum();
            (certs as f64 / certified.len() as f64 * 100.0).round() / 100.0
        },
        avg_usage_increase: increase,
        impact_score: impact_score(certified_fraction(dataset), increase, retention),
        retention_rate: retention,
        status_breakdown: status_breakdown(&dataset.source_slices()),
    }
}

pub fn impact_report(dataset: &Dataset) -> ImpactReport {
    let products: [(&str, fn(&ProductUsageRecord) -> f64); 4] = [
        ("total_usage_hours", |u| u.total_usage_hours),
        ("copilot_days", |u| u.copilot_days as f64),
        ("actions_days", |u| u.actions_days as f64),
        ("security_days", |u| u.security_days as f64),
    ];

    let products: Vec<ProductImpact> = products
        .iter()
        .map(|(product, field)| {
            let (all, certified) = usage_split(dataset, field);
            ProductImpact {
                product: product.to_string(),
                avg_certified: round1(mean(&certified)),
                avg_all: round1(mean(&all)),
                increase: usage_increase(&all, &certified),
            }
        })
        .collect();

    let increase = products.first().map_or(0.0, |p| p.increase);
    let retention = retention_rate(dataset);
    ImpactReport {
        usage_increase: increase,
        retention_rate: retention,
        impact_score: impact_score(certified_fraction(dataset), increase, retention),
        products,
    }
}

pub fn journey_report(dataset: &Dataset, weights: &SkillWeights) -> JourneyReport {
    let funnel = compute_funnel(&dataset.learners);
    let drop_off = drop_off(&funnel);

    let days: Vec<f64> = dataset
        .learners
        .iter()
        .filter_map(|l| dataset.journey_for(l))
        .filter(|j| j.is_certified)
        .filter_map(|j| j.days_to_certification)
        .map(f64::from)
        .collect();
    let avg_days_to_certification = (!days.is_empty()).then(|| round1(mean(&days)));

    let mut stages: HashMap<&str, u64> = HashMap::new();
    for learner in &dataset.learners {
        if !learner.journey_stage.is_empty() {
            *stages.entry(learner.journey_stage.as_str()).or_insert(0) += 1;
        }
    }
    let mut stage_distribution: Vec<StageCount> = stages
        .into_iter()
        .map(|(stage, count)| StageCount {
            stage: stage.to_string(),
            count,
        })
        .collect();
    stage_distribution.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.stage.cmp(&b.stage)));

    JourneyReport {
        funnel,
        drop_off,
        avg_days_to_certification,
        stage_distribution,
        avg_skill_score: skills::average_score(dataset, weights),
    }
}

/// Most-certified learners. Ties go to the more recent certification, then
/// to the alphabetically first email.
pub fn top_learners_report(dataset: &Dataset) -> TopLearnersReport {
    let mut ranked: Vec<&LearnerRecord> = dataset
        .learners
        .iter()
        .filter(|l| l.total_certifications > 0)
        .collect();
    ranked.sort_by(|a, b| {
        b.total_certifications
            .cmp(&a.total_certifications)
            .then_with(|| b.latest_certification_date.cmp(&a.latest_certification_date))
            .then_with(|| a.email.cmp(&b.email))
    });

    TopLearnersReport {
        learners: ranked
            .into_iter()
            .take(TOP_LEARNERS)
            .map(|l| TopLearner {
                email: l.email.clone(),
                handle: l.handle.clone(),
                certifications: l.total_certifications,
                titles: l.certification_titles.clone(),
                latest_certification: l.latest_certification_date,
            })
            .collect(),
    }
}

pub fn copilot_insights_report(dataset: &Dataset) -> CopilotInsightsReport {
    let mut certified_days = Vec::new();
    let mut uncertified_days = Vec::new();
    let mut total_events = 0u64;

    for learner in &dataset.learners {
        let usage = dataset.usage_for(learner);
        if usage.copilot_events == 0 {
            continue;
        }
        total_events += usage.copilot_events;
        if learner.is_certified() {
            certified_days.push(usage.copilot_days as f64);
        } else {
            uncertified_days.push(usage.copilot_days as f64);
        }
    }

    CopilotInsightsReport {
        adopters: (certified_days.len() + uncertified_days.len()) as u64,
        total_events,
        avg_days_certified: round1(mean(&certified_days)),
        avg_days_uncertified: round1(mean(&uncertified_days)),
        engagement: engagement::engagement_distribution(dataset.learners.iter().map(|l| {
            let usage = dataset.usage_for(l);
            (usage.copilot_events, usage.copilot_days)
        })),
    }
}

pub fn github_activity_report(dataset: &Dataset) -> GithubActivityReport {
    let products: [(&str, fn(&ProductUsageRecord) -> (u64, u64)); 4] = [
        ("learning", |u| (u.learning_events, u.learning_days)),
        ("copilot", |u| (u.copilot_events, u.copilot_days)),
        ("actions", |u| (u.actions_events, u.actions_days)),
        ("security", |u| (u.security_events, u.security_days)),
    ];

    GithubActivityReport {
        products: products
            .iter()
            .map(|(product, counters)| {
                let mut adoption = ProductAdoption {
                    product: product.to_string(),
                    active_users: 0,
                    total_events: 0,
                    total_days: 0,
                };
                for learner in &dataset.learners {
                    let (events, days) = counters(dataset.usage_for(learner));
                    if events > 0 {
                        adoption.active_users += 1;
                    }
                    adoption.total_events += events;
                    adoption.total_days += days;
                }
                adoption
            })
            .collect(),
        actions_engagement: engagement::engagement_distribution(dataset.learners.iter().map(
            |l| {
                let usage = dataset.usage_for(l);
                (usage.actions_events, usage.actions_days)
            },
        )),
    }
}
