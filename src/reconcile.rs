//! Identity reconciliation across the learner datasets.
//!
//! Collections are merged first-writer-wins by email: the first collection to
//! mention an email owns that learner, and later records for the same email
//! are discarded whole, even when they carry fields the winner lacks. The
//! derived percentages were built on this coarse merge, so it stays.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::Result;
use crate::models::{JourneyRecord, LearnerRecord, LearningActivityRecord, ProductUsageRecord};
use crate::normalize::{ActivityRow, JourneyRow, LearnerRow, UsageRow};
use crate::readers;

/// Dataset stems under the data directory, in reconciliation priority order
/// for the two learner collections.
pub const CERTIFIED_USERS: &str = "certified_users";
pub const UNIFIED_USERS: &str = "unified_users";
pub const PRODUCT_USAGE: &str = "product_usage";
pub const LEARNING_ACTIVITY: &str = "learning_activity";
pub const JOURNEY_COMPLETE: &str = "journey_complete";

/// numeric id → email, first mapping seen wins.
#[derive(Debug, Default)]
pub struct IdIndex {
    emails: HashMap<u64, String>,
}

impl IdIndex {
    pub fn record(&mut self, numeric_id: u64, email: &str) {
        if numeric_id != 0 && !email.is_empty() {
            self.emails
                .entry(numeric_id)
                .or_insert_with(|| email.to_string());
        }
    }

    pub fn email_for(&self, numeric_id: u64) -> Option<&str> {
        if numeric_id == 0 {
            return None;
        }
        self.emails.get(&numeric_id).map(String::as_str)
    }

    /// Fills in a missing email from the numeric id. Returns false when the
    /// record has no usable identity at all.
    fn resolve(&self, email: &mut String, numeric_id: u64) -> bool {
        if !email.is_empty() {
            return true;
        }
        match self.email_for(numeric_id) {
            Some(found) => {
                *email = found.to_string();
                true
            }
            None => false,
        }
    }
}

/// Merges learner collections given in priority order.
///
/// Records without an email that cannot be resolved through `index` are
/// dropped, so every returned record has a unique, non-empty email.
pub fn reconcile(collections: &[&[LearnerRecord]], index: &IdIndex) -> Vec<LearnerRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();

    for collection in collections {
        for record in collection.iter() {
            let mut record = record.clone();
            if !index.resolve(&mut record.email, record.numeric_id) {
                tracing::debug!(numeric_id = record.numeric_id, "dropping learner without identity");
                continue;
            }
            if seen.insert(record.email.clone()) {
                merged.push(record);
            }
        }
    }

    merged
}

/// The reconciled learner view plus the per-learner side tables.
#[derive(Debug, Default)]
pub struct Dataset {
    pub learners: Vec<LearnerRecord>,
    /// Source collections after identity resolution, in priority order.
    pub sources: Vec<Vec<LearnerRecord>>,
    usage: HashMap<u64, ProductUsageRecord>,
    activity_by_email: HashMap<String, LearningActivityRecord>,
    activity_by_id: HashMap<u64, LearningActivityRecord>,
    journey_by_email: HashMap<String, JourneyRecord>,
    journey_by_id: HashMap<u64, JourneyRecord>,
    no_usage: ProductUsageRecord,
}

impl Dataset {
    pub fn build(
        sources: Vec<Vec<LearnerRecord>>,
        usage: Vec<ProductUsageRecord>,
        activity: Vec<LearningActivityRecord>,
        journeys: Vec<JourneyRecord>,
    ) -> Self {
        let mut index = IdIndex::default();
        for learner in sources.iter().flatten() {
            index.record(learner.numeric_id, &learner.email);
        }
        for row in &activity {
            index.record(row.numeric_id, &row.email);
        }
        for row in &journeys {
            index.record(row.numeric_id, &row.email);
        }

        let sources: Vec<Vec<LearnerRecord>> = sources
            .into_iter()
            .map(|collection| {
                collection
                    .into_iter()
                    .filter_map(|mut learner| {
                        index
                            .resolve(&mut learner.email, learner.numeric_id)
                            .then_some(learner)
                    })
                    .collect()
            })
            .collect();

        let borrowed: Vec<&[LearnerRecord]> = sources.iter().map(Vec::as_slice).collect();
        let learners = reconcile(&borrowed, &index);

        let mut dataset = Dataset {
            learners,
            ..Default::default()
        };

        for row in usage {
            if row.numeric_id != 0 {
                dataset.usage.entry(row.numeric_id).or_insert(row);
            }
        }
        for row in activity {
            if !row.email.is_empty() {
                dataset
                    .activity_by_email
                    .entry(row.email.clone())
                    .or_insert_with(|| row.clone());
            }
            if row.numeric_id != 0 {
                dataset.activity_by_id.entry(row.numeric_id).or_insert(row);
            }
        }
        for row in journeys {
            if !row.email.is_empty() {
                dataset
                    .journey_by_email
                    .entry(row.email.clone())
                    .or_insert_with(|| row.clone());
            }
            if row.numeric_id != 0 {
                dataset.journey_by_id.entry(row.numeric_id).or_insert(row);
            }
        }

        dataset.sources = sources;
        dataset
    }

    /// Usage for a learner; learners with no usage row get all zeros.
    pub fn usage_for(&self, learner: &LearnerRecord) -> &ProductUsageRecord {
        self.usage
            .get(&learner.numeric_id)
            .unwrap_or(&self.no_usage)
    }

    pub fn activity_for(&self, learner: &LearnerRecord) -> Option<&LearningActivityRecord> {
        self.activity_by_email
            .get(&learner.email)
            .or_else(|| self.activity_by_id.get(&learner.numeric_id))
    }

    pub fn journey_for(&self, learner: &LearnerRecord) -> Option<&JourneyRecord> {
        self.journey_by_email
            .get(&learner.email)
            .or_else(|| self.journey_by_id.get(&learner.numeric_id))
    }

    pub fn source_slices(&self) -> Vec<&[LearnerRecord]> {
        self.sources.iter().map(Vec::as_slice).collect()
    }
}

/// Runs readers → normalizer → reconciler over a data directory.
///
/// Returns `Ok(None)` when neither learner collection has been exported yet;
/// the side tables are optional and default to empty.
pub fn load_dataset(dir: &Path) -> Result<Option<Dataset>> {
    let certified = readers::read_dataset::<LearnerRow>(dir, CERTIFIED_USERS)?;
    let unified = readers::read_dataset::<LearnerRow>(dir, UNIFIED_USERS)?;
    if certified.is_none() && unified.is_none() {
        tracing::warn!(dir = %dir.display(), "no learner datasets found");
        return Ok(None);
    }

    let learners = |rows: Option<Vec<LearnerRow>>| -> Vec<LearnerRecord> {
        rows.unwrap_or_default().into_iter().map(LearnerRecord::from).collect()
    };
    let sources = vec![learners(certified), learners(unified)];

    let usage = readers::read_dataset::<UsageRow>(dir, PRODUCT_USAGE)?
        .unwrap_or_default()
        .into_iter()
        .map(ProductUsageRecord::from)
        .collect();
    let activity = readers::read_dataset::<ActivityRow>(dir, LEARNING_ACTIVITY)?
        .unwrap_or_default()
        .into_iter()
        .map(LearningActivityRecord::from)
        .collect();
    let journeys = readers::read_dataset::<JourneyRow>(dir, JOURNEY_COMPLETE)?
        .unwrap_or_default()
        .into_iter()
        .map(JourneyRecord::from)
        .collect();

    let dataset = Dataset::build(sources, usage, activity, journeys);
    tracing::info!(
        dir = %dir.display(),
        learners = dataset.learners.len(),
        "reconciled learner dataset"
    );
    Ok(Some(dataset))
}
