//! Five-dimension skill score feeding the journey overview.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::metrics::round1;
use crate::models::{LearnerRecord, LearnerSkill, LevelCount, SkillDimensions, SkillsReport};
use crate::reconcile::Dataset;

const LEARNING_FULL_DAYS: f64 = 30.0;
const USAGE_FULL_HOURS: f64 = 50.0;
const POINTS_PER_CERTIFICATION: f64 = 25.0;
const CONSISTENCY_FULL_DAYS: f64 = 20.0;
const POINTS_PER_PRODUCT: f64 = 25.0;
const TOP_SKILLED: usize = 10;

/// Dimension weights as whole percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillWeights {
    pub learning: u32,
    pub product_usage: u32,
    pub certification: u32,
    pub consistency: u32,
    pub growth: u32,
}

impl Default for SkillWeights {
    fn default() -> Self {
        Self {
            learning: 25,
            product_usage: 35,
            certification: 15,
            consistency: 15,
            growth: 10,
        }
    }
}

impl SkillWeights {
    pub fn total(&self) -> u32 {
        self.learning + self.product_usage + self.certification + self.consistency + self.growth
    }

    /// Weights must sum to exactly 100%.
    pub fn validate(self) -> Result<Self> {
        match self.total() {
            100 => Ok(self),
            other => Err(Error::Config(format!(
                "skill weights must sum to 100, got {other}"
            ))),
        }
    }

    pub fn as_fractions(&self) -> SkillDimensions {
        SkillDimensions {
            learning: f64::from(self.learning) / 100.0,
            product_usage: f64::from(self.product_usage) / 100.0,
            certification: f64::from(self.certification) / 100.0,
            consistency: f64::from(self.consistency) / 100.0,
            growth: f64::from(self.growth) / 100.0,
        }
    }
}

fn scaled(value: f64, full: f64) -> f64 {
    (value / full * 100.0).clamp(0.0, 100.0)
}

/// Per-dimension scores in `[0, 100]` for one learner.
pub fn dimensions(dataset: &Dataset, learner: &LearnerRecord) -> SkillDimensions {
    let usage = dataset.usage_for(learner);
    let learning_days = dataset
        .activity_for(learner)
        .map_or(0, |activity| activity.learning_days)
        .max(usage.learning_days);

    SkillDimensions {
        learning: scaled(learning_days as f64, LEARNING_FULL_DAYS),
        product_usage: scaled(usage.total_usage_hours, USAGE_FULL_HOURS),
        certification: (learner.total_certifications as f64 * POINTS_PER_CERTIFICATION).min(100.0),
        consistency: scaled(usage.busiest_product_days() as f64, CONSISTENCY_FULL_DAYS),
        growth: (usage.products_used() as f64 * POINTS_PER_PRODUCT).min(100.0),
    }
}

pub fn score(weights: &SkillWeights, dims: &SkillDimensions) -> u32 {
    let weighted = f64::from(weights.learning) * dims.learning
        + f64::from(weights.product_usage) * dims.product_usage
        + f64::from(weights.certification) * dims.certification
        + f64::from(weights.consistency) * dims.consistency
        + f64::from(weights.growth) * dims.growth;
    (weighted / 100.0).round().clamp(0.0, 100.0) as u32
}

pub const LEVELS: [&str; 4] = ["Novice", "Developing", "Proficient", "Expert"];

pub fn level(score: u32) -> &'static str {
    match score {
        0..=24 => LEVELS[0],
        25..=49 => LEVELS[1],
        50..=74 => LEVELS[2],
        _ => LEVELS[3],
    }
}

pub fn average_score(dataset: &Dataset, weights: &SkillWeights) -> f64 {
    if dataset.learners.is_empty() {
        return 0.0;
    }
    let total: u64 = dataset
        .learners
        .iter()
        .map(|learner| u64::from(score(weights, &dimensions(dataset, learner))))
        .sum();
    round1(total as f64 / dataset.learners.len() as f64)
}

pub fn skills_report(dataset: &Dataset, weights: SkillWeights) -> SkillsReport {
    let count = dataset.learners.len();
    let mut sums = SkillDimensions {
        learning: 0.0,
        product_usage: 0.0,
        certification: 0.0,
        consistency: 0.0,
        growth: 0.0,
    };
    let mut levels: HashMap<&'static str, u64> = HashMap::new();
    let mut scored = Vec::with_capacity(count);
    let mut total_score = 0u64;

    for learner in &dataset.learners {
        let dims = dimensions(dataset, learner);
        sums.learning += dims.learning;
        sums.product_usage += dims.product_usage;
        sums.certification += dims.certification;
        sums.consistency += dims.consistency;
        sums.growth += dims.growth;

        let learner_score = score(&weights, &dims);
        total_score += u64::from(learner_score);
        *levels.entry(level(learner_score)).or_insert(0) += 1;
        scored.push(LearnerSkill {
            email: learner.email.clone(),
            handle: learner.handle.clone(),
            score: learner_score,
            level: level(learner_score).to_string(),
        });
    }

    let mean = |sum: f64| if count == 0 { 0.0 } else { round1(sum / count as f64) };

    scored.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.email.cmp(&b.email)));
    scored.truncate(TOP_SKILLED);

    SkillsReport {
        weights: weights.as_fractions(),
        dimension_averages: SkillDimensions {
            learning: mean(sums.learning),
            product_usage: mean(sums.product_usage),
            certification: mean(sums.certification),
            consistency: mean(sums.consistency),
            growth: mean(sums.growth),
        },
        average_score: mean(total_score as f64),
        distribution: LEVELS
            .iter()
            .map(|name| LevelCount {
                level: name.to_string(),
                count: levels.get(name).copied().unwrap_or(0),
            })
            .collect(),
        top_learners: scored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LearningActivityRecord, ProductUsageRecord};
    use crate::reconcile::tests::learner;

    #[test]
    fn default_weights_sum_to_one_hundred_percent() {
        let weights = SkillWeights::default();
        assert_eq!(weights.total(), 100);
        assert!(weights.validate().is_ok());

        let skewed = SkillWeights {
            growth: 11,
            ..SkillWeights::default()
        };
        assert!(skewed.validate().is_err());
    }

    #[test]
    fn maxed_dimensions_score_one_hundred() {
        let dims = SkillDimensions {
            learning: 100.0,
            product_usage: 100.0,
            certification: 100.0,
            consistency: 100.0,
            growth: 100.0,
        };
        assert_eq!(score(&SkillWeights::default(), &dims), 100);
    }

    #[test]
    fn dimensions_are_capped() {
        let dataset = Dataset::build(
            vec![vec![learner("a@x.com", 1, "Champion", 9)]],
            vec![ProductUsageRecord {
                numeric_id: 1,
                learning_events: 10,
                learning_days: 3,
                copilot_events: 400,
                copilot_days: 60,
                total_usage_hours: 120.0,
                ..Default::default()
            }],
            vec![LearningActivityRecord {
                email: "a@x.com".to_string(),
                learning_days: 45,
                ..Default::default()
            }],
            Vec::new(),
        );

        let dims = dimensions(&dataset, &dataset.learners[0]);
        assert_eq!(dims.learning, 100.0);
        assert_eq!(dims.product_usage, 100.0);
        assert_eq!(dims.certification, 100.0);
        assert_eq!(dims.consistency, 100.0);
        assert_eq!(dims.growth, 50.0);
        // 25 + 35 + 15 + 15 + 5
        assert_eq!(score(&SkillWeights::default(), &dims), 95);
        assert_eq!(average_score(&dataset, &SkillWeights::default()), 95.0);
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(level(0), "Novice");
        assert_eq!(level(24), "Novice");
        assert_eq!(level(25), "Developing");
        assert_eq!(level(74), "Proficient");
        assert_eq!(level(75), "Expert");
    }

    #[test]
    fn report_on_empty_dataset_is_zeroed() {
        let report = skills_report(&Dataset::default(), SkillWeights::default());
        assert_eq!(report.average_score, 0.0);
        assert_eq!(report.distribution.len(), 4);
        assert!(report.top_learners.is_empty());
    }
}
