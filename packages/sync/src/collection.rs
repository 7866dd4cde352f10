//! Id-keyed, arrival-ordered record collection.

use std::collections::{BTreeMap, VecDeque};

use protest_map_hazard_models::{Record, RecordId};

/// The in-memory list a map view renders from.
///
/// Records are keyed by id, so delivering the same record twice (once via
/// the snapshot, once via the subscription) is a no-op. Iteration order is
/// arrival order: live inserts go to the front, snapshot rows keep their
/// recency order behind whatever is already present. Records that are not
/// displayed (inactive panic alerts) are never admitted.
#[derive(Debug, Clone)]
pub struct LiveCollection<R: Record> {
    by_id: BTreeMap<RecordId, R>,
    order: VecDeque<RecordId>,
}

impl<R: Record> Default for LiveCollection<R> {
    fn default() -> Self {
        Self {
            by_id: BTreeMap::new(),
            order: VecDeque::new(),
        }
    }
}

impl<R: Record> LiveCollection<R> {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether a record with `id` is held.
    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Looks up a record by id.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&R> {
        self.by_id.get(id)
    }

    /// Prepends a newly arrived record.
    ///
    /// Returns `false` if the record was already present or is not
    /// displayed.
    pub fn push_front(&mut self, record: R) -> bool {
        if !self.admit(&record) {
            return false;
        }
        self.order.push_front(record.id().clone());
        self.by_id.insert(record.id().clone(), record);
        true
    }

    /// Appends snapshot rows (newest first) behind everything already held.
    ///
    /// Returns the number of rows admitted.
    pub fn extend_back(&mut self, records: impl IntoIterator<Item = R>) -> usize {
        let mut admitted = 0;
        for record in records {
            if self.admit(&record) {
                self.order.push_back(record.id().clone());
                self.by_id.insert(record.id().clone(), record);
                admitted += 1;
            }
        }
        admitted
    }

    /// Prepends snapshot rows (newest first) that are missing, keeping
    /// their relative order. Used to backfill inserts missed while the
    /// subscription was down.
    ///
    /// Returns the admitted records, newest first.
    pub fn backfill_front(&mut self, records: Vec<R>) -> Vec<R> {
        let missing: Vec<R> = records.into_iter().filter(|r| self.admit(r)).collect();
        for record in missing.iter().rev() {
            self.order.push_front(record.id().clone());
            self.by_id.insert(record.id().clone(), record.clone());
        }
        missing
    }

    /// Iterates records in display order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    /// Clones the records out in display order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<R> {
        self.iter().cloned().collect()
    }

    fn admit(&self, record: &R) -> bool {
        record.is_displayed() && !self.by_id.contains_key(record.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use protest_map_hazard_models::{HazardReport, PanicAlert};

    fn report(id: &str, minutes_ago: i64) -> HazardReport {
        HazardReport {
            id: RecordId::from(id),
            location_lat: -1.29,
            location_lng: 36.82,
            danger_type: "Tear Gas".to_string(),
            description: None,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            is_verified: false,
        }
    }

    fn ids(c: &LiveCollection<HazardReport>) -> Vec<String> {
        c.iter().map(|r| r.id.0.clone()).collect()
    }

    #[test]
    fn snapshot_then_insert_prepends() {
        let mut c = LiveCollection::new();
        assert_eq!(c.extend_back(vec![report("b", 1), report("a", 2)]), 2);

        assert!(c.push_front(report("c", 0)));

        assert_eq!(c.len(), 3);
        assert_eq!(ids(&c), ["c", "b", "a"]);
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let mut c = LiveCollection::new();
        assert!(c.push_front(report("x", 0)));
        assert_eq!(c.extend_back(vec![report("x", 0), report("y", 5)]), 1);
        assert!(!c.push_front(report("y", 5)));

        assert_eq!(ids(&c), ["x", "y"]);
    }

    #[test]
    fn arrival_order_wins_over_created_at() {
        let mut c = LiveCollection::new();
        c.push_front(report("new", 0));
        c.push_front(report("old-but-late", 30));
        assert_eq!(ids(&c), ["old-but-late", "new"]);
    }

    #[test]
    fn backfill_keeps_recency_order_at_front() {
        let mut c = LiveCollection::new();
        c.extend_back(vec![report("a", 10)]);

        let added = c.backfill_front(vec![report("c", 1), report("b", 2), report("a", 10)]);

        assert_eq!(added.len(), 2);
        assert_eq!(ids(&c), ["c", "b", "a"]);
    }

    #[test]
    fn inactive_alerts_are_rejected() {
        let mut c = LiveCollection::new();
        let alert = PanicAlert {
            id: RecordId::from("p"),
            location_lat: 0.0,
            location_lng: 0.0,
            emergency_note: None,
            created_at: Utc::now(),
            is_active: false,
        };
        assert!(!c.push_front(alert));
        assert!(c.is_empty());
    }
}
