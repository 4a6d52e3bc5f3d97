use super::debounce::Debouncer;
use super::history::SearchHistory;
use super::models::{SearchFilters, SearchQuery, SearchResult, Session};
use super::search::search_sessions;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Results of the last executed query.
#[derive(Debug, Clone, Default)]
pub struct LiveResults {
    pub query: String,
    pub results: Vec<SearchResult>,
}

/// Search-as-you-type over a snapshot of sessions.
///
/// Each edit reschedules the search; only the last edit inside the debounce
/// window runs. Executed non-blank queries are recorded in the shared history.
pub struct LiveSearch {
    sessions: Arc<Vec<Session>>,
    query: SearchQuery,
    debouncer: Debouncer,
    history: Arc<Mutex<SearchHistory>>,
    results: Arc<watch::Sender<Arc<LiveResults>>>,
}

impl LiveSearch {
    pub fn new(
        sessions: Vec<Session>,
        history: Arc<Mutex<SearchHistory>>,
        debounce: Duration,
    ) -> Self {
        let (results, _) = watch::channel(Arc::new(LiveResults::default()));
        Self {
            sessions: Arc::new(sessions),
            query: SearchQuery::default(),
            debouncer: Debouncer::new(debounce),
            history,
            results: Arc::new(results),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<LiveResults>> {
        self.results.subscribe()
    }

    pub fn latest(&self) -> Arc<LiveResults> {
        self.results.borrow().clone()
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    /// Replace the searched sessions, e.g. after the store changed.
    pub fn set_sessions(&mut self, sessions: Vec<Session>) {
        self.sessions = Arc::new(sessions);
        self.schedule();
    }

    pub fn set_query(&mut self, text: &str) {
        self.query.text = text.to_string();
        self.schedule();
    }

    pub fn set_regex(&mut self, use_regex: bool) {
        self.query.use_regex = use_regex;
        self.schedule();
    }

    pub fn set_filters(&mut self, filters: SearchFilters) {
        self.query.filters = filters;
        self.schedule();
    }

    fn schedule(&mut self) {
        if self.query.text.trim().is_empty() {
            self.debouncer.cancel();
            self.results.send_replace(Arc::new(LiveResults::default()));
            return;
        }

        let sessions = self.sessions.clone();
        let query = self.query.clone();
        let history = self.history.clone();
        let results = self.results.clone();

        self.debouncer.call(move || {
            let found = search_sessions(&sessions, &query);
            debug!("Live search {:?}: {} results", query.text, found.len());

            match history.lock() {
                Ok(mut history) => history.record(&query.text),
                Err(e) => warn!("Search history unavailable: {}", e),
            }

            results.send_replace(Arc::new(LiveResults {
                query: query.text,
                results: found,
            }));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Message;

    fn sessions() -> Vec<Session> {
        let mut session = Session::new("audio");
        session.messages = vec![
            Message::user("trim the intro"),
            Message::bot("Trimmed 3 seconds from the intro"),
            Message::user("now normalize"),
        ];
        vec![session]
    }

    #[tokio::test]
    async fn test_typing_runs_only_final_query() {
        let history = Arc::new(Mutex::new(SearchHistory::in_memory(10)));
        let mut live = LiveSearch::new(sessions(), history.clone(), Duration::from_millis(40));
        let mut rx = live.subscribe();

        for prefix in ["i", "in", "int", "intr", "intro"] {
            live.set_query(prefix);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        let latest = live.latest();
        assert_eq!(latest.query, "intro");
        assert_eq!(latest.results.len(), 2);
        assert_eq!(history.lock().unwrap().entries(), ["intro"]);
    }

    #[tokio::test]
    async fn test_blank_query_clears_immediately() {
        let history = Arc::new(Mutex::new(SearchHistory::in_memory(10)));
        let mut live = LiveSearch::new(sessions(), history.clone(), Duration::from_millis(20));

        live.set_query("normalize");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(live.latest().results.len(), 1);

        live.set_query("");
        assert!(live.latest().results.is_empty());
        assert_eq!(history.lock().unwrap().entries(), ["normalize"]);
    }
}
