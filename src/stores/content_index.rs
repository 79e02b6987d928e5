use crate::core::error::IndexError;
use crate::models::file::AcademicFile;
use dashmap::DashMap;

/// Content-addressed index of every file known to the network
pub struct ContentIndex {
    files: DashMap<String, AcademicFile>,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
        }
    }

    /// Insert a file record keyed by its CID
    ///
    /// Adding a CID that is already indexed keeps the existing record and adds
    /// the new owner to its locations, so identical bytes collapse to one
    /// record. Returns the stored record.
    pub fn add(&self, file: AcademicFile) -> AcademicFile {
        let mut entry = self
            .files
            .entry(file.cid.clone())
            .or_insert_with(|| file.clone());

        let stored = entry.value_mut();
        if !stored.peer_locations.contains(&file.owner_id) {
            stored.peer_locations.push(file.owner_id.clone());
        }
        stored.is_available = !stored.peer_locations.is_empty();

        stored.clone()
    }

    pub fn get(&self, cid: &str) -> Option<AcademicFile> {
        self.files.get(cid).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, cid: &str) -> bool {
        self.files.contains_key(cid)
    }

    /// Linear case-insensitive substring search; an empty query matches all
    pub fn search(&self, query: &str) -> Vec<AcademicFile> {
        let needle = query.trim().to_lowercase();

        self.files
            .iter()
            .filter(|entry| needle.is_empty() || entry.value().matches(&needle))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn by_subject(&self, subject: &str) -> Vec<AcademicFile> {
        self.files
            .iter()
            .filter(|entry| entry.value().subject.eq_ignore_ascii_case(subject))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<AcademicFile> {
        self.files.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Record that `peer_id` hosts a copy; adding twice is a no-op
    pub fn add_peer_location(&self, cid: &str, peer_id: &str) -> Result<(), IndexError> {
        let mut file = self
            .files
            .get_mut(cid)
            .ok_or_else(|| IndexError::NotFound(cid.to_string()))?;

        if !file.peer_locations.iter().any(|p| p == peer_id) {
            file.peer_locations.push(peer_id.to_string());
        }
        file.is_available = true;

        Ok(())
    }

    /// Drop `peer_id` from the hosts; removing the last one marks the file unavailable
    pub fn remove_peer_location(&self, cid: &str, peer_id: &str) -> Result<(), IndexError> {
        let mut file = self
            .files
            .get_mut(cid)
            .ok_or_else(|| IndexError::NotFound(cid.to_string()))?;

        file.peer_locations.retain(|p| p != peer_id);
        file.is_available = !file.peer_locations.is_empty();

        Ok(())
    }

    /// Remove `peer_id` from every file it hosts; returns the CIDs touched
    pub fn remove_peer_everywhere(&self, peer_id: &str) -> Vec<String> {
        let mut touched = Vec::new();

        for mut entry in self.files.iter_mut() {
            let file = entry.value_mut();
            let before = file.peer_locations.len();
            file.peer_locations.retain(|p| p != peer_id);
            if file.peer_locations.len() != before {
                file.is_available = !file.peer_locations.is_empty();
                touched.push(file.cid.clone());
            }
        }

        touched
    }

    pub fn record_download(&self, cid: &str) -> Result<u64, IndexError> {
        let mut file = self
            .files
            .get_mut(cid)
            .ok_or_else(|| IndexError::NotFound(cid.to_string()))?;

        file.download_count += 1;
        Ok(file.download_count)
    }

    /// Fold a new score into the running mean
    pub fn add_rating(&self, cid: &str, score: f64) -> Result<f64, IndexError> {
        let mut file = self
            .files
            .get_mut(cid)
            .ok_or_else(|| IndexError::NotFound(cid.to_string()))?;

        let total = file.total_ratings as f64;
        file.average_rating = (file.average_rating * total + score) / (total + 1.0);
        file.total_ratings += 1;

        Ok(file.average_rating)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|entry| entry.value().size).sum()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for ContentIndex {
    fn default() -> Self {
        Self::new()
    }
}
