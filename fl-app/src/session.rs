//! In-memory per-session state, keyed by caller-supplied session id.

use crate::config::InsightsConfig;
use crate::insights::{Debouncer, Insight, InsightCache};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fl_llm::{ChatMessage, Usage};
use fl_powerbi::FilterContext;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_SESSION_ID: &str = "default";

pub struct SessionState {
    pub id: Uuid,
    pub name: String,
    /// Completed question/answer pairs only; tool turns stay inside one agent run.
    pub transcript: Vec<ChatMessage>,
    pub filters: FilterContext,
    pub insights: InsightCache,
    pub debouncer: Debouncer,
    pub usage_totals: Usage,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    recent: VecDeque<Insight>,
    history_limit: usize,
    transcript_limit: usize,
}

impl SessionState {
    pub fn new(
        name: impl Into<String>,
        cfg: &InsightsConfig,
        history_messages: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            transcript: Vec::new(),
            filters: FilterContext::new(),
            insights: InsightCache::new(
                Duration::from_secs(cfg.cache_ttl_seconds),
                cfg.cache_max_entries,
            ),
            debouncer: Debouncer::new(Duration::from_millis(cfg.debounce_ms)),
            usage_totals: Usage::default(),
            created_at: now,
            last_active: now,
            recent: VecDeque::new(),
            history_limit: cfg.history_limit.max(1),
            transcript_limit: (history_messages / 2) * 2,
        }
    }

    /// Newest first, at most `history_limit` entries.
    pub fn recent_insights(&self) -> Vec<Insight> {
        self.recent.iter().cloned().collect()
    }

    pub(crate) fn remember_insight(&mut self, insight: Insight) {
        self.recent.push_front(insight);
        self.recent.truncate(self.history_limit);
    }

    /// Keeps the newest `history_messages` messages, trimmed a whole pair at a time.
    pub fn remember_exchange(&mut self, question: &str, answer: &str) {
        self.transcript.push(ChatMessage::user(question));
        self.transcript.push(ChatMessage::assistant(answer));
        let excess = self.transcript.len().saturating_sub(self.transcript_limit);
        self.transcript.drain(..excess);
    }

    pub fn record_usage(&mut self, usage: Usage) {
        self.usage_totals.prompt_tokens += usage.prompt_tokens;
        self.usage_totals.completion_tokens += usage.completion_tokens;
        self.last_active = Utc::now();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
            last_active: self.last_active,
            messages: self.transcript.len(),
            filters: self.filters.describe(),
            usage_totals: self.usage_totals,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub messages: usize,
    pub filters: String,
    pub usage_totals: Usage,
}

/// Sessions are handed out as `Arc<Mutex<_>>` so no map shard lock is held
/// across an agent run.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<SessionState>>>,
    insights_cfg: InsightsConfig,
    history_messages: usize,
}

impl SessionStore {
    pub fn new(insights_cfg: InsightsConfig, history_messages: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            insights_cfg,
            history_messages,
        }
    }

    /// Blank or missing ids map to [`DEFAULT_SESSION_ID`].
    pub fn get_or_create(&self, session_id: Option<&str>) -> Arc<Mutex<SessionState>> {
        let name = normalize_id(session_id);
        self.sessions
            .entry(name.clone())
            .or_insert_with(|| {
                tracing::debug!(session = %name, "session created");
                Arc::new(Mutex::new(SessionState::new(
                    name.clone(),
                    &self.insights_cfg,
                    self.history_messages,
                )))
            })
            .clone()
    }

    pub fn get(&self, session_id: Option<&str>) -> Option<Arc<Mutex<SessionState>>> {
        self.sessions
            .get(&normalize_id(session_id))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

fn normalize_id(session_id: Option<&str>) -> String {
    match session_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => DEFAULT_SESSION_ID.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(InsightsConfig::default(), 4)
    }

    #[tokio::test]
    async fn blank_ids_share_the_default_session() {
        let store = store();
        let a = store.get_or_create(None);
        let b = store.get_or_create(Some("  "));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().await.name, DEFAULT_SESSION_ID);
        let other = store.get_or_create(Some("analyst-7"));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(store.len(), 2);
        assert!(store.get(Some("missing")).is_none());
    }

    #[tokio::test]
    async fn transcript_keeps_only_the_newest_exchanges() {
        let store = store();
        let session = store.get_or_create(Some("s"));
        let mut session = session.lock().await;
        for i in 0..10 {
            session.remember_exchange(&format!("question {i}"), &format!("answer {i}"));
        }
        assert_eq!(session.transcript.len(), 4);
        assert_eq!(session.transcript[0].role, fl_llm::Role::User);
        assert_eq!(session.transcript[0].content, "question 8");
        assert_eq!(session.transcript[3].content, "answer 9");
    }

    #[tokio::test]
    async fn sessions_keep_independent_filters() {
        let store = store();
        let a = store.get_or_create(Some("a"));
        let b = store.get_or_create(Some("b"));
        a.lock().await.filters = FilterContext::new().with(
            "MONTH",
            fl_powerbi::ColumnFilter {
                table: "flights".to_string(),
                values: vec![fl_powerbi::FilterValue::Number(3.0)],
                kind: fl_powerbi::FilterKind::Basic,
            },
        );
        assert!(!a.lock().await.filters.is_empty());
        assert!(b.lock().await.filters.is_empty());
    }
}
