//! Least-filled condition assignment over historical summaries.
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::condition::Condition;
use crate::sink::{RecordSink, RecordType};

/// Completed non-test sessions per condition. All four cells are always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateCounts {
    counts: BTreeMap<String, u64>,
}

impl AggregateCounts {
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            counts: Condition::ALL
                .iter()
                .map(|cell| (cell.condition_id(), 0))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, condition: Condition) -> u64 {
        self.counts
            .get(&condition.condition_id())
            .copied()
            .unwrap_or(0)
    }

    fn increment(&mut self, condition: Condition) {
        *self.counts.entry(condition.condition_id()).or_insert(0) += 1;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Largest minus smallest cell count.
    #[must_use]
    pub fn spread(&self) -> u64 {
        let max = self.counts.values().max().copied().unwrap_or(0);
        let min = self.counts.values().min().copied().unwrap_or(0);
        max - min
    }

    /// Cells tied at the minimum count, in canonical order.
    #[must_use]
    pub fn least_filled(&self) -> Vec<Condition> {
        let min = Condition::ALL
            .iter()
            .map(|cell| self.get(*cell))
            .min()
            .unwrap_or(0);
        Condition::ALL
            .into_iter()
            .filter(|cell| self.get(*cell) == min)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(id, count)| (id.as_str(), *count))
    }
}

impl Default for AggregateCounts {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Counts completed sessions and picks the next condition.
#[derive(Debug, Clone)]
pub struct ConditionBalancer {
    test_prefix: String,
}

impl ConditionBalancer {
    #[must_use]
    pub fn new(test_prefix: impl Into<String>) -> Self {
        Self {
            test_prefix: test_prefix.into(),
        }
    }

    /// Whether a raw record belongs to developer or test traffic.
    #[must_use]
    pub fn is_test_record(&self, record: &Value) -> bool {
        let flagged = record.get("is_test").and_then(Value::as_bool) == Some(true);
        let prefixed = record
            .get("participant_id")
            .and_then(Value::as_str)
            .is_some_and(|id| id.starts_with(&self.test_prefix));
        flagged || prefixed
    }

    /// Count summary records per cell, skipping test traffic and malformed rows.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the store cannot be scanned.
    pub fn aggregate_counts<S: RecordSink + ?Sized>(
        &self,
        sink: &S,
    ) -> Result<AggregateCounts, S::Error> {
        let mut counts = AggregateCounts::zeroed();
        for record in sink.scan_by_type(RecordType::Summary)? {
            if self.is_test_record(&record) {
                continue;
            }
            match record_condition(&record) {
                Some(condition) => counts.increment(condition),
                None => log::warn!("skipping summary record without a valid condition: {record}"),
            }
        }
        Ok(counts)
    }

    /// Choose uniformly among the least-filled cells.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the store cannot be scanned.
    pub fn assign<S, R>(&self, sink: &S, rng: &mut R) -> Result<Condition, S::Error>
    where
        S: RecordSink + ?Sized,
        R: Rng + ?Sized,
    {
        let counts = self.aggregate_counts(sink)?;
        Ok(Self::pick(&counts, rng))
    }

    /// Pure selection step, exposed for property tests.
    pub fn pick<R: Rng + ?Sized>(counts: &AggregateCounts, rng: &mut R) -> Condition {
        let candidates = counts.least_filled();
        let chosen = candidates
            .choose(rng)
            .copied()
            .unwrap_or(Condition::ALL[0]);
        log::debug!(
            "assigned {chosen} from {} least-filled cell(s), {} completed sessions",
            candidates.len(),
            counts.total()
        );
        chosen
    }
}

fn record_condition(record: &Value) -> Option<Condition> {
    if let Some(id) = record.get("condition_id").and_then(Value::as_str) {
        return Condition::from_condition_id(id);
    }
    let frame = record.get("frame_type").and_then(Value::as_str)?;
    let loss = record.get("loss_frame").and_then(Value::as_str)?;
    Condition::from_pair(frame, loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use serde_json::json;

    fn summary(id: &str, condition_id: &str) -> Value {
        json!({"participant_id": id, "record_type": "summary", "condition_id": condition_id})
    }

    #[test]
    fn empty_store_counts_all_cells_as_zero() {
        let sink = MemorySink::new();
        let counts = ConditionBalancer::new("TEST_")
            .aggregate_counts(&sink)
            .unwrap();
        assert_eq!(counts.iter().count(), 4);
        assert_eq!(counts.total(), 0);
        assert_eq!(counts.least_filled().len(), 4);
    }

    #[test]
    fn test_and_malformed_records_are_ignored() {
        let sink = MemorySink::with_records(vec![
            summary("P1", "skill_near_miss"),
            summary("TEST_P2", "skill_near_miss"),
            json!({"participant_id": "P3", "record_type": "summary", "condition_id": "skill_near_miss", "is_test": true}),
            summary("P4", "bogus"),
            json!({"participant_id": "P5", "record_type": "summary"}),
            json!({"participant_id": "P6", "record_type": "summary", "frame_type": "luck", "loss_frame": "clear_loss"}),
            json!({"participant_id": "P7", "record_type": "trial", "condition_id": "luck_near_miss"}),
        ]);
        let counts = ConditionBalancer::new("TEST_")
            .aggregate_counts(&sink)
            .unwrap();
        assert_eq!(counts.get(Condition::ALL[0]), 1);
        assert_eq!(counts.get(Condition::ALL[3]), 1);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn never_picks_an_overfilled_cell() {
        let sink = MemorySink::with_records(vec![
            summary("P1", "skill_near_miss"),
            summary("P2", "skill_near_miss"),
            summary("P3", "skill_clear_loss"),
            summary("P4", "luck_near_miss"),
            summary("P5", "luck_clear_loss"),
        ]);
        let balancer = ConditionBalancer::new("TEST_");
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..200 {
            let chosen = balancer.assign(&sink, &mut rng).unwrap();
            assert_ne!(chosen, Condition::ALL[0]);
        }
    }

    #[test]
    fn ties_are_broken_across_all_candidates() {
        let counts = AggregateCounts::zeroed();
        let mut rng = SmallRng::seed_from_u64(2);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            seen.insert(ConditionBalancer::pick(&counts, &mut rng));
        }
        assert_eq!(seen.len(), 4);
    }
}
