use crate::models::rating::{Rating, RatingStats, RatingTarget};
use dashmap::DashMap;

/// Ratings keyed by target id, with a uniqueness index per (rater, target, kind)
pub struct RatingStore {
    by_target: DashMap<String, Vec<Rating>>,
    submitted: DashMap<(String, String, RatingTarget), String>,
}

impl RatingStore {
    pub fn new() -> Self {
        Self {
            by_target: DashMap::new(),
            submitted: DashMap::new(),
        }
    }

    pub fn has_rated(&self, rater_id: &str, target_id: &str, kind: RatingTarget) -> bool {
        self.submitted
            .contains_key(&(rater_id.to_string(), target_id.to_string(), kind))
    }

    /// Store a rating unless the same rater already rated the target
    ///
    /// Returns false on a duplicate. The check and insert are one atomic step.
    pub fn insert(&self, rating: Rating) -> bool {
        let key = (
            rating.rater_id.clone(),
            rating.target_id.clone(),
            rating.target_kind,
        );

        match self.submitted.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(rating.id.clone());
                self.by_target
                    .entry(rating.target_id.clone())
                    .or_default()
                    .push(rating);
                true
            }
        }
    }

    /// Take back a stored rating; the rater may submit again afterwards
    pub fn remove(&self, rating: &Rating) -> bool {
        let key = (
            rating.rater_id.clone(),
            rating.target_id.clone(),
            rating.target_kind,
        );

        if self.submitted.remove_if(&key, |_, id| *id == rating.id).is_none() {
            return false;
        }

        if let Some(mut ratings) = self.by_target.get_mut(&rating.target_id) {
            ratings.retain(|r| r.id != rating.id);
        }
        self.by_target
            .remove_if(&rating.target_id, |_, ratings| ratings.is_empty());
        true
    }

    pub fn ratings_for(&self, target_id: &str) -> Vec<Rating> {
        self.by_target
            .get(target_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn stats_for(&self, target_id: &str) -> RatingStats {
        match self.by_target.get(target_id) {
            Some(entry) => RatingStats::from_ratings(entry.value().iter()),
            None => RatingStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.submitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submitted.is_empty()
    }
}

impl Default for RatingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(rater: &str, target: &str, kind: RatingTarget, score: u8) -> Rating {
        Rating {
            id: format!("{}-{}", rater, target),
            rater_id: rater.to_string(),
            target_id: target.to_string(),
            target_kind: kind,
            score,
            comment: "helpful".to_string(),
            created_at: 100,
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let store = RatingStore::new();
        assert!(store.insert(rating("a", "b", RatingTarget::Peer, 5)));
        assert!(!store.insert(rating("a", "b", RatingTarget::Peer, 1)));
        assert!(store.has_rated("a", "b", RatingTarget::Peer));
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats_for("b").average, 5.0);
    }

    #[test]
    fn test_different_raters_accumulate() {
        let store = RatingStore::new();
        store.insert(rating("a", "kx-1", RatingTarget::File, 5));
        store.insert(rating("c", "kx-1", RatingTarget::File, 3));

        let stats = store.stats_for("kx-1");
        assert_eq!(stats.count, 2);
        assert_eq!(stats.average, 4.0);
        assert_eq!(store.ratings_for("kx-1").len(), 2);
        assert_eq!(store.stats_for("unknown").count, 0);
    }

    #[test]
    fn test_remove_frees_the_slot() {
        let store = RatingStore::new();
        let first = rating("a", "b", RatingTarget::Peer, 5);
        store.insert(first.clone());
        store.insert(rating("c", "b", RatingTarget::Peer, 3));

        assert!(store.remove(&first));
        assert!(!store.remove(&first));
        assert!(!store.has_rated("a", "b", RatingTarget::Peer));
        assert_eq!(store.stats_for("b").count, 1);

        assert!(store.insert(rating("a", "b", RatingTarget::Peer, 4)));
        assert_eq!(store.len(), 2);
    }
}
