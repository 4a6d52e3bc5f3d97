use super::models::{SavedSearch, SearchQuery};
use super::storage::{LocalStorage, SAVED_SEARCHES_KEY, SEARCH_HISTORY_KEY};
use anyhow::Result;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

/// Recently executed queries, most recent first.
pub struct SearchHistory {
    entries: Vec<String>,
    limit: usize,
    storage: Option<LocalStorage>,
}

impl SearchHistory {
    pub fn in_memory(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit,
            storage: None,
        }
    }

    pub fn load(storage: LocalStorage, limit: usize) -> Self {
        let mut entries: Vec<String> = match storage.get(SEARCH_HISTORY_KEY) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unreadable search history: {}", e);
                Vec::new()
            }
        };
        dedup_preserving_order(&mut entries);
        entries.truncate(limit);

        Self {
            entries,
            limit,
            storage: Some(storage),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Move `query` to the front, dropping the oldest entry past the limit.
    /// Blank queries are ignored.
    pub fn record(&mut self, query: &str) {
        if query.trim().is_empty() {
            return;
        }

        self.entries.retain(|q| q != query);
        self.entries.insert(0, query.to_string());
        self.entries.truncate(self.limit);
        self.persist();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    fn persist(&self) {
        if let Some(storage) = &self.storage
            && let Err(e) = storage.set(SEARCH_HISTORY_KEY, &self.entries)
        {
            warn!("Failed to persist search history: {}", e);
        }
    }
}

fn dedup_preserving_order(entries: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    entries.retain(|q| seen.insert(q.clone()));
}

/// Named queries kept across runs.
pub struct SavedSearches {
    searches: Vec<SavedSearch>,
    storage: LocalStorage,
}

impl SavedSearches {
    pub fn load(storage: LocalStorage) -> Result<Self> {
        let searches = storage.get(SAVED_SEARCHES_KEY)?.unwrap_or_default();
        Ok(Self { searches, storage })
    }

    pub fn list(&self) -> &[SavedSearch] {
        &self.searches
    }

    /// Look up by id, falling back to an exact name match.
    pub fn get(&self, id_or_name: &str) -> Option<&SavedSearch> {
        self.searches
            .iter()
            .find(|s| s.id == id_or_name)
            .or_else(|| self.searches.iter().find(|s| s.name == id_or_name))
    }

    pub fn save(&mut self, name: &str, query: &SearchQuery) -> Result<SavedSearch> {
        let saved = SavedSearch {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            query: query.text.clone(),
            use_regex: query.use_regex,
            filters: query.filters.clone(),
            created_at: Utc::now(),
        };

        self.searches.push(saved.clone());
        self.storage.set(SAVED_SEARCHES_KEY, &self.searches)?;
        Ok(saved)
    }

    pub fn delete(&mut self, id_or_name: &str) -> Result<bool> {
        let Some(id) = self.get(id_or_name).map(|s| s.id.clone()) else {
            return Ok(false);
        };

        self.searches.retain(|s| s.id != id);
        self.storage.set(SAVED_SEARCHES_KEY, &self.searches)?;
        Ok(true)
    }
}
