use marks_core::bookmark::Bookmark;

/// Local, ordered copy of the current owner's bookmarks.
///
/// Records are kept newest first by `created_at` and ids are unique. The
/// cache does not know about owners or sessions; callers guard it.
#[derive(Debug, Clone, Default)]
pub struct ReplicaCache {
    records: Vec<Bookmark>,
}

impl ReplicaCache {
    /// Creates a new empty ReplicaCache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole contents with a fresh listing.
    ///
    /// The listing is re-sorted newest first; for duplicate ids the first
    /// occurrence in that order wins.
    pub fn replace(&mut self, mut records: Vec<Bookmark>) {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut seen = std::collections::HashSet::new();
        records.retain(|record| seen.insert(record.id.clone()));
        self.records = records;
    }

    /// Adds a record at its place in the ordering.
    ///
    /// A freshly inserted record is the newest one, so this is normally the
    /// front. An existing record with the same id is replaced.
    pub fn prepend(&mut self, record: Bookmark) {
        self.records.retain(|existing| existing.id != record.id);
        let position = self
            .records
            .iter()
            .position(|existing| existing.created_at <= record.created_at)
            .unwrap_or(self.records.len());
        self.records.insert(position, record);
    }

    /// Removes the record with `id`.
    ///
    /// # Returns
    ///
    /// `true` if a record was removed, `false` if none matched.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.id != id);
        self.records.len() != before
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &[Bookmark] {
        &self.records
    }

    /// Owned copy of the records, for handing to a renderer.
    pub fn snapshot(&self) -> Vec<Bookmark> {
        self.records.clone()
    }

    pub fn get(&self, id: &str) -> Option<&Bookmark> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bookmark(id: &str, minutes: i64) -> Bookmark {
        Bookmark {
            id: id.to_string(),
            title: format!("Title {}", id),
            url: format!("https://{}.example", id),
            owner_id: "owner-1".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    fn ids(cache: &ReplicaCache) -> Vec<&str> {
        cache.records().iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn test_replace_sorts_newest_first() {
        let mut cache = ReplicaCache::new();
        cache.replace(vec![bookmark("a", 1), bookmark("c", 3), bookmark("b", 2)]);
        assert_eq!(ids(&cache), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_replace_drops_duplicate_ids() {
        let mut cache = ReplicaCache::new();
        cache.replace(vec![bookmark("a", 1), bookmark("a", 1), bookmark("b", 2)]);
        assert_eq!(ids(&cache), vec!["b", "a"]);
    }

    #[test]
    fn test_replace_discards_previous_contents() {
        let mut cache = ReplicaCache::new();
        cache.replace(vec![bookmark("old", 1)]);
        cache.replace(vec![bookmark("new", 2)]);
        assert_eq!(ids(&cache), vec!["new"]);
    }

    #[test]
    fn test_prepend_newest_goes_first() {
        let mut cache = ReplicaCache::new();
        cache.replace(vec![bookmark("a", 1), bookmark("b", 2)]);
        cache.prepend(bookmark("c", 3));
        assert_eq!(ids(&cache), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_prepend_older_record_keeps_ordering() {
        let mut cache = ReplicaCache::new();
        cache.replace(vec![bookmark("a", 1), bookmark("c", 3)]);
        cache.prepend(bookmark("b", 2));
        assert_eq!(ids(&cache), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_prepend_existing_id_is_not_duplicated() {
        let mut cache = ReplicaCache::new();
        cache.replace(vec![bookmark("a", 1)]);
        cache.prepend(bookmark("a", 1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut cache = ReplicaCache::new();
        cache.replace(vec![bookmark("a", 1), bookmark("b", 2)]);

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(ids(&cache), vec!["b"]);
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn test_clear() {
        let mut cache = ReplicaCache::new();
        cache.replace(vec![bookmark("a", 1)]);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.snapshot().is_empty());
    }
}
