use super::config::{PopularityDecay, RankingConfig};
use super::models::{Session, SessionUpdate};
use super::store::SessionStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize)]
pub struct PopularSession<'a> {
    pub session: &'a Session,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionViews<'a> {
    pub recent: Vec<&'a Session>,
    pub popular: Vec<PopularSession<'a>>,
    pub pinned: Vec<&'a Session>,
}

fn by_recency(a: &Session, b: &Session) -> Ordering {
    b.last_activity().cmp(&a.last_activity())
}

fn days_since(session: &Session, now: DateTime<Utc>) -> f64 {
    let elapsed = now - session.last_activity();
    (elapsed.num_seconds().max(0) as f64) / 86_400.0
}

/// Non-archived sessions active within the window, newest first.
pub fn recent_sessions<'a>(
    sessions: &'a [Session],
    config: &RankingConfig,
    now: DateTime<Utc>,
) -> Vec<&'a Session> {
    let cutoff = now - Duration::days(config.recent_window_days);

    let mut recent: Vec<&Session> = sessions
        .iter()
        .filter(|s| !s.is_archived && s.last_activity() >= cutoff)
        .collect();
    recent.sort_by(|a, b| by_recency(a, b));
    recent.truncate(config.recent_limit);
    recent
}

pub fn popularity_score(session: &Session, decay: PopularityDecay, now: DateTime<Utc>) -> f64 {
    let messages = session.messages.len() as f64;
    let days = days_since(session, now);

    match decay {
        PopularityDecay::Linear { window_days } => messages * (window_days - days).max(0.0),
        PopularityDecay::Exponential { half_life_days } if half_life_days > 0.0 => {
            messages * (-days / half_life_days * std::f64::consts::LN_2).exp()
        }
        PopularityDecay::Exponential { .. } => 0.0,
    }
}

/// Non-archived sessions with at least one message, highest score first.
pub fn popular_sessions<'a>(
    sessions: &'a [Session],
    config: &RankingConfig,
    now: DateTime<Utc>,
) -> Vec<PopularSession<'a>> {
    let mut popular: Vec<PopularSession> = sessions
        .iter()
        .filter(|s| !s.is_archived && !s.messages.is_empty())
        .map(|session| PopularSession {
            session,
            score: popularity_score(session, config.popular_decay, now),
        })
        .collect();

    popular.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| by_recency(a.session, b.session))
    });
    popular.truncate(config.popular_limit);
    popular
}

pub fn pinned_sessions(sessions: &[Session]) -> Vec<&Session> {
    let mut pinned: Vec<&Session> = sessions.iter().filter(|s| s.is_pinned()).collect();
    pinned.sort_by(|a, b| by_recency(a, b));
    pinned
}

pub fn session_views<'a>(
    sessions: &'a [Session],
    config: &RankingConfig,
    now: DateTime<Utc>,
) -> SessionViews<'a> {
    SessionViews {
        recent: recent_sessions(sessions, config, now),
        popular: popular_sessions(sessions, config, now),
        pinned: pinned_sessions(sessions),
    }
}

/// Flip `metadata.isPinned` through the store. Returns the new pin state.
pub fn toggle_pin(store: &mut SessionStore, session_id: &str) -> Option<bool> {
    let session = store.get_session(session_id)?;
    let pinned = !session.is_pinned();

    let mut metadata = session.metadata.clone();
    metadata.is_pinned = Some(pinned);
    store.update_session(
        session_id,
        SessionUpdate {
            metadata: Some(metadata),
            ..Default::default()
        },
    );
    Some(pinned)
}
