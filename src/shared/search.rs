use super::models::{HighlightSpan, SearchFilters, SearchQuery, SearchResult, Session};
use regex::{Regex, RegexBuilder};
use std::cmp::Reverse;
use tracing::debug;

/// Compiled matcher for one query.
pub struct SearchEngine {
    pattern: Regex,
}

impl SearchEngine {
    /// Build a matcher for `text`. Returns `None` for a blank query.
    ///
    /// In regex mode an invalid pattern falls back to a literal match of the
    /// same text instead of failing.
    pub fn new(text: &str, use_regex: bool) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }

        if use_regex {
            match build_case_insensitive(text) {
                Ok(pattern) => return Some(Self { pattern }),
                Err(e) => debug!("Invalid regex {:?}, searching literally: {}", text, e),
            }
        }

        build_case_insensitive(&regex::escape(text))
            .ok()
            .map(|pattern| Self { pattern })
    }

    /// All non-empty, non-overlapping matches as character-offset spans.
    pub fn highlights(&self, text: &str) -> Vec<HighlightSpan> {
        let mut spans = Vec::new();
        // Walk matches in order so the byte->char conversion is incremental.
        let mut chars_before = 0;
        let mut byte_cursor = 0;

        for m in self.pattern.find_iter(text) {
            if m.as_str().is_empty() {
                continue;
            }
            chars_before += text[byte_cursor..m.start()].chars().count();
            let len = m.as_str().chars().count();
            spans.push(HighlightSpan {
                start: chars_before,
                end: chars_before + len,
                text: m.as_str().to_string(),
            });
            chars_before += len;
            byte_cursor = m.end();
        }

        spans
    }

    pub fn search(&self, sessions: &[Session], filters: &SearchFilters) -> Vec<SearchResult> {
        let mut results = Vec::new();

        for session in sessions {
            if let Some(session_filter) = &filters.session_id
                && &session.id != session_filter
            {
                continue;
            }

            for message in &session.messages {
                if !filters.sender.accepts(message.sender) {
                    continue;
                }

                let timestamp = session.message_time(message);
                let day = timestamp.date_naive();
                if filters.date_from.is_some_and(|from| day < from) {
                    continue;
                }
                if filters.date_to.is_some_and(|to| day > to) {
                    continue;
                }

                let highlights = self.highlights(&message.text);
                if highlights.is_empty() {
                    continue;
                }

                results.push(SearchResult {
                    session_id: session.id.clone(),
                    session_title: session.title.clone(),
                    message_id: message.id.clone(),
                    message_text: message.text.clone(),
                    sender: message.sender,
                    timestamp,
                    highlights,
                });
            }
        }

        // Stable sort keeps session/message order among equal timestamps.
        results.sort_by_key(|r| Reverse(r.timestamp));
        results
    }
}

fn build_case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Run `query` over every session. Blank queries return nothing.
pub fn search_sessions(sessions: &[Session], query: &SearchQuery) -> Vec<SearchResult> {
    let Some(engine) = SearchEngine::new(&query.text, query.use_regex) else {
        return Vec::new();
    };

    let mut results = engine.search(sessions, &query.filters);
    if query.limit > 0 {
        results.truncate(query.limit);
    }
    debug!("Query {:?} matched {} messages", query.text, results.len());
    results
}

/// Excerpt of `text` around the first highlight, with the match bracketed.
pub fn snippet(text: &str, highlights: &[HighlightSpan], radius: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let Some(first) = highlights.first() else {
        return truncate_content(text, radius * 2);
    };

    let start = first.start.saturating_sub(radius);
    let end = (first.end + radius).min(chars.len());

    let before: String = chars[start..first.start].iter().collect();
    let matched: String = chars[first.start..first.end].iter().collect();
    let after: String = chars[first.end..end].iter().collect();

    let mut out = format!("{before}[{matched}]{after}");
    if start > 0 {
        out = format!("…{out}");
    }
    if end < chars.len() {
        out.push('…');
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Safely truncate string at UTF-8 character boundary
fn truncate_content(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{Message, Sender, SenderFilter};
    use chrono::{DateTime, NaiveDate, Utc};

    fn message(id: &str, text: &str, sender: Sender, at: Option<&str>) -> Message {
        Message {
            id: id.to_string(),
            text: text.to_string(),
            sender,
            timestamp: at.map(|t| t.parse::<DateTime<Utc>>().unwrap()),
        }
    }

    fn session(id: &str, created: &str, messages: Vec<Message>) -> Session {
        let mut session = Session::new(format!("Session {id}"));
        session.id = id.to_string();
        session.created_at = created.parse().unwrap();
        session.messages = messages;
        session
    }

    fn fixture() -> Vec<Session> {
        vec![
            session(
                "s1",
                "2024-01-01T08:00:00Z",
                vec![
                    message(
                        "m1",
                        "What are React hooks?",
                        Sender::User,
                        Some("2024-01-01T09:00:00Z"),
                    ),
                    message(
                        "m2",
                        "React hooks are functions...",
                        Sender::Bot,
                        Some("2024-01-01T09:00:05Z"),
                    ),
                ],
            ),
            session(
                "s2",
                "2024-01-02T08:00:00Z",
                vec![
                    message(
                        "m3",
                        "Normalize the audio to -14 LUFS",
                        Sender::User,
                        Some("2024-01-02T10:00:00Z"),
                    ),
                    message("m4", "Done. Loudness is now -14 LUFS.", Sender::Bot, None),
                    message(
                        "m5",
                        "Cost is $5 (approx.)",
                        Sender::Bot,
                        Some("2023-12-31T23:59:59Z"),
                    ),
                ],
            ),
        ]
    }

    fn query(text: &str, use_regex: bool) -> SearchQuery {
        SearchQuery {
            text: text.to_string(),
            use_regex,
            ..Default::default()
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.message_id.as_str()).collect()
    }

    #[test]
    fn test_react_hooks_example() {
        let results = search_sessions(&fixture(), &query("React hooks", false));
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.session_id == "s1"));
        assert_eq!(ids(&results), vec!["m2", "m1"]);
        assert_eq!(results[0].session_title, "Session s1");
    }

    #[test]
    fn test_plain_text_is_case_insensitive_substring() {
        let sessions = fixture();
        let results = search_sessions(&sessions, &query("lufs", false));
        let expected: Vec<&str> = sessions
            .iter()
            .flat_map(|s| &s.messages)
            .filter(|m| m.text.to_lowercase().contains("lufs"))
            .map(|m| m.id.as_str())
            .collect();

        let mut got = ids(&results);
        got.sort();
        let mut expected = expected;
        expected.sort();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_plain_text_escapes_metacharacters() {
        let results = search_sessions(&fixture(), &query("$5 (approx.)", false));
        assert_eq!(ids(&results), vec!["m5"]);
        assert_eq!(results[0].highlights[0].text, "$5 (approx.)");
    }

    #[test]
    fn test_regex_alternation_is_union() {
        let sessions = fixture();
        let mut union = ids(&search_sessions(&sessions, &query("hooks|LUFS", true)))
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut separate: Vec<String> = search_sessions(&sessions, &query("hooks", true))
            .into_iter()
            .chain(search_sessions(&sessions, &query("LUFS", true)))
            .map(|r| r.message_id)
            .collect();
        union.sort();
        separate.sort();
        separate.dedup();
        assert_eq!(union, separate);
    }

    #[test]
    fn test_invalid_regex_matches_like_plain_text() {
        let mut sessions = fixture();
        sessions[0]
            .messages
            .push(message("m6", "this is [invalid syntax", Sender::User, None));

        let regex = search_sessions(&sessions, &query("[invalid", true));
        let plain = search_sessions(&sessions, &query("[invalid", false));
        assert_eq!(ids(&regex), vec!["m6"]);
        assert_eq!(ids(&regex), ids(&plain));
    }

    #[test]
    fn test_blank_query_returns_nothing() {
        assert!(search_sessions(&fixture(), &query("   ", false)).is_empty());
        assert!(SearchEngine::new("", true).is_none());
    }

    #[test]
    fn test_sender_filter() {
        let mut q = query("e", false);
        q.filters.sender = SenderFilter::User;
        let results = search_sessions(&fixture(), &q);
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.sender == Sender::User));
    }

    #[test]
    fn test_session_filter() {
        let mut q = query("e", false);
        q.filters.session_id = Some("s2".to_string());
        let results = search_sessions(&fixture(), &q);
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.session_id == "s2"));
    }

    #[test]
    fn test_single_day_date_filter() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut q = query("e", false);
        q.filters.date_from = Some(day);
        q.filters.date_to = Some(day);

        let results = search_sessions(&fixture(), &q);
        assert_eq!(ids(&results), vec!["m2", "m1"]);
        assert!(results.iter().all(|r| r.timestamp.date_naive() == day));
    }

    #[test]
    fn test_missing_timestamp_uses_session_creation() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut q = query("loudness", false);
        q.filters.date_from = Some(day);
        q.filters.date_to = Some(day);

        let results = search_sessions(&fixture(), &q);
        assert_eq!(ids(&results), vec!["m4"]);
        assert_eq!(
            results[0].timestamp,
            "2024-01-02T08:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_results_newest_first_and_limit() {
        let mut q = query("o", false);
        let results = search_sessions(&fixture(), &q);
        assert!(results.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        q.limit = 2;
        assert_eq!(search_sessions(&fixture(), &q).len(), 2);
    }

    #[test]
    fn test_highlights_are_char_offsets() {
        let engine = SearchEngine::new("hook", false).unwrap();
        let text = "Über hooks: HOOK again";
        let spans = engine.highlights(text);

        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].start, 5);
        assert_eq!(spans[0].end, 9);
        assert_eq!(spans[1].text, "HOOK");
        let chars: Vec<char> = text.chars().collect();
        let second: String = chars[spans[1].start..spans[1].end].iter().collect();
        assert_eq!(second, "HOOK");
    }

    #[test]
    fn test_empty_regex_matches_are_skipped() {
        let engine = SearchEngine::new("x*", true).unwrap();
        assert!(engine.highlights("abc").is_empty());
        assert_eq!(engine.highlights("axxb").len(), 1);
    }

    #[test]
    fn test_snippet_brackets_first_match() {
        let text = "one two three four five six seven";
        let engine = SearchEngine::new("four", false).unwrap();
        let spans = engine.highlights(text);
        assert_eq!(snippet(text, &spans, 4), "…ree [four] fiv…");
        assert_eq!(snippet("short", &[], 10), "short");
    }
}
