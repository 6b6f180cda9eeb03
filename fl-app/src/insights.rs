//! Auto-insights on filter changes.
//!
//! The cache answers "has this exact filter context been summarized recently";
//! the debouncer answers "is this trigger too soon after the last one". They are
//! kept separate and composed by [`InsightService::auto_insight`].

use crate::agent::AUTO_INSIGHT_PROMPT;
use crate::session::SessionState;
use chrono::{DateTime, Utc};
use fl_llm::{ChatMessage, ChatModel};
use fl_powerbi::{FilterContext, FilteredStats, MetricsCalculator};
use moka::sync::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    Model,
    Summary,
}

#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    pub key: String,
    pub text: String,
    pub source: InsightSource,
    pub filters: FilterContext,
    pub stats: FilteredStats,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum InsightOutcome {
    Cached(Insight),
    Suppressed,
    Generated(Insight),
}

impl InsightOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Cached(_) => "cached",
            Self::Suppressed => "suppressed",
            Self::Generated(_) => "generated",
        }
    }

    pub fn insight(&self) -> Option<&Insight> {
        match self {
            Self::Cached(i) | Self::Generated(i) => Some(i),
            Self::Suppressed => None,
        }
    }
}

/// Bounded LRU with a time-to-live, keyed by the filter-context hash.
#[derive(Clone)]
pub struct InsightCache {
    inner: Cache<String, Insight>,
}

impl InsightCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_entries)
                .build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Insight> {
        self.inner.get(key)
    }

    pub fn insert(&self, insight: Insight) {
        self.inner.insert(insight.key.clone(), insight);
    }
}

/// Refuses a trigger that arrives within `interval` of the previous trigger.
/// Refused triggers still count, so a steady burst stays suppressed.
pub struct Debouncer {
    interval: Duration,
    last_trigger: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_trigger: None,
        }
    }

    pub fn try_accept(&mut self, at: Instant) -> bool {
        let accepted = match self.last_trigger {
            Some(last) => at.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        self.last_trigger = Some(self.last_trigger.map_or(at, |last| last.max(at)));
        accepted
    }
}

#[derive(Clone)]
pub struct InsightService {
    metrics: MetricsCalculator,
    llm: Option<Arc<dyn ChatModel>>,
}

impl InsightService {
    pub fn new(metrics: MetricsCalculator, llm: Option<Arc<dyn ChatModel>>) -> Self {
        Self { metrics, llm }
    }

    /// `triggered_at` is when the filter change arrived, not when the session
    /// lock was obtained.
    #[tracing::instrument(level = "info", skip_all, fields(filters = filters.columns().count()))]
    pub async fn auto_insight(
        &self,
        session: &mut SessionState,
        filters: &FilterContext,
        triggered_at: Instant,
    ) -> InsightOutcome {
        session.filters = filters.clone();
        let key = filters.hash();
        if let Some(hit) = session.insights.get(&key) {
            tracing::debug!(key = %key, "insight cache hit");
            return InsightOutcome::Cached(hit);
        }
        if !session.debouncer.try_accept(triggered_at) {
            tracing::debug!("insight trigger suppressed by debounce");
            return InsightOutcome::Suppressed;
        }

        let started = Instant::now();
        let stats = self.metrics.compute_filtered_stats(filters).await;
        let (text, source) = match self.model_text(filters, &stats).await {
            Some(text) => (text, InsightSource::Model),
            None => (summary_text(filters, &stats), InsightSource::Summary),
        };
        let insight = Insight {
            key,
            text,
            source,
            filters: filters.clone(),
            stats,
            generated_at: Utc::now(),
        };
        session.insights.insert(insight.clone());
        session.remember_insight(insight.clone());
        tracing::info!(
            source = ?insight.source,
            failed_metrics = insight.stats.failed_metrics.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "insight generated"
        );
        InsightOutcome::Generated(insight)
    }

    async fn model_text(&self, filters: &FilterContext, stats: &FilteredStats) -> Option<String> {
        let llm = self.llm.as_ref()?;
        let prompt = format!(
            "Active filters: {}\n\nStatistics:\n{}",
            filters.describe(),
            stats.summary_lines().join("\n")
        );
        let messages = [ChatMessage::system(AUTO_INSIGHT_PROMPT), ChatMessage::user(prompt)];
        match llm.chat(&messages, &[]).await {
            Ok(response) if !response.message.content.trim().is_empty() => {
                Some(response.message.content.trim().to_string())
            }
            Ok(_) => {
                tracing::warn!("llm returned an empty insight; using summary");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "llm insight failed; using summary");
                None
            }
        }
    }
}

/// Deterministic insight text built from the statistics alone.
pub fn summary_text(filters: &FilterContext, stats: &FilteredStats) -> String {
    if stats.total_flights <= 0.0 {
        return format!("No flights match {}.", filters.describe());
    }
    let mut text = format!(
        "{:.0} flights match {}, with an average departure delay of {:.1} minutes. {:.1}% departed on time and {:.1}% were cancelled.",
        stats.total_flights,
        filters.describe(),
        stats.avg_departure_delay,
        stats.on_time_pct,
        stats.cancelled_pct
    );
    if let Some(top) = stats.top_delay_cause() {
        text.push_str(&format!(
            " {} is the largest delay cause at {:.1}% of delay minutes.",
            top.label, top.pct
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{ScriptedModel, reply};
    use crate::config::InsightsConfig;
    use fl_powerbi::testing::{ManualClock, StubTransport, query_text, rows_envelope, stub_executor};
    use fl_powerbi::{Clock, ColumnFilter, FilterKind, FilterValue, HttpResponse};
    use serde_json::json;

    fn stats_dataset() -> Arc<StubTransport> {
        let transport = Arc::new(StubTransport::new());
        transport.respond_with(|request| {
            let query = query_text(request).unwrap_or_default();
            let value = if query.contains("[CANCELLED]") {
                4.0
            } else if ["_DELAY]", "[DIVERTED]", "SUMX"].iter().any(|m| query.contains(m)) {
                10.0
            } else {
                200.0
            };
            Ok(HttpResponse {
                status: 200,
                body: rows_envelope(json!([{"[Value]": value}])).to_string(),
            })
        });
        transport
    }

    fn airline(codes: &[&str]) -> ColumnFilter {
        ColumnFilter {
            table: "airlines".to_string(),
            values: codes.iter().map(|c| FilterValue::Text(c.to_string())).collect(),
            kind: FilterKind::Basic,
        }
    }

    fn month(m: f64) -> ColumnFilter {
        ColumnFilter {
            table: "flights".to_string(),
            values: vec![FilterValue::Number(m)],
            kind: FilterKind::Basic,
        }
    }

    fn session() -> SessionState {
        SessionState::new("s1", &InsightsConfig::default(), 8)
    }

    #[tokio::test]
    async fn repeated_context_is_served_from_cache() {
        let transport = stats_dataset();
        let service = InsightService::new(MetricsCalculator::new(stub_executor(transport.clone())), None);
        let clock = ManualClock::new();
        let mut session = session();

        let first = FilterContext::new()
            .with("AIRLINE", airline(&["AA"]))
            .with("MONTH", month(1.0));
        let generated = service.auto_insight(&mut session, &first, clock.now()).await;
        assert_eq!(generated.status(), "generated");
        let requests_after_first = transport.request_count();

        let reordered = FilterContext::new()
            .with("MONTH", month(1.0))
            .with("AIRLINE", airline(&["AA"]));
        let cached = service.auto_insight(&mut session, &reordered, clock.now()).await;
        assert_eq!(cached.status(), "cached");
        assert_eq!(transport.request_count(), requests_after_first);
        assert_eq!(
            cached.insight().map(|i| i.text.clone()),
            generated.insight().map(|i| i.text.clone())
        );
        assert_eq!(session.recent_insights().len(), 1);
    }

    #[tokio::test]
    async fn distinct_contexts_do_not_collide_and_bursts_are_debounced() {
        let transport = stats_dataset();
        let service = InsightService::new(MetricsCalculator::new(stub_executor(transport)), None);
        let clock = ManualClock::new();
        let mut session = session();

        // Same superficial rendering "AA,DL", different structure.
        let one_value = FilterContext::new().with("AIRLINE", airline(&["AA,DL"]));
        let two_values = FilterContext::new().with("AIRLINE", airline(&["AA", "DL"]));
        assert_ne!(one_value.hash(), two_values.hash());

        assert_eq!(service.auto_insight(&mut session, &one_value, clock.now()).await.status(), "generated");
        assert_eq!(service.auto_insight(&mut session, &two_values, clock.now()).await.status(), "suppressed");
        clock.advance(Duration::from_millis(1500));
        assert_eq!(service.auto_insight(&mut session, &two_values, clock.now()).await.status(), "generated");
        assert_eq!(service.auto_insight(&mut session, &one_value, clock.now()).await.status(), "cached");
    }

    #[tokio::test]
    async fn model_text_is_used_when_available() {
        let model = Arc::new(ScriptedModel::new(|messages| {
            assert!(messages[1].content.contains("Total flights: 200"));
            reply("200 flights, 2.0% cancelled.")
        }));
        let service = InsightService::new(
            MetricsCalculator::new(stub_executor(stats_dataset())),
            Some(model.clone()),
        );
        let clock = ManualClock::new();
        let mut session = session();
        let outcome = service.auto_insight(&mut session, &FilterContext::new(), clock.now()).await;
        let insight = outcome.insight().expect("generated");
        assert_eq!(insight.source, InsightSource::Model);
        assert_eq!(insight.text, "200 flights, 2.0% cancelled.");
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn summary_is_used_without_a_model() {
        let service = InsightService::new(MetricsCalculator::new(stub_executor(stats_dataset())), None);
        let clock = ManualClock::new();
        let mut session = session();
        let outcome = service.auto_insight(&mut session, &FilterContext::new(), clock.now()).await;
        let insight = outcome.insight().expect("generated");
        assert_eq!(insight.source, InsightSource::Summary);
        assert!(insight.text.starts_with("200 flights match no filters"), "{}", insight.text);
        assert!(insight.text.contains("2.0% were cancelled"));
    }

    #[test]
    fn debouncer_accepts_first_trigger_then_waits_for_interval() {
        let clock = ManualClock::new();
        let mut debouncer = Debouncer::new(Duration::from_millis(1500));
        assert!(debouncer.try_accept(clock.now()));
        clock.advance(Duration::from_millis(1500));
        assert!(debouncer.try_accept(clock.now()));
        clock.advance(Duration::from_millis(1499));
        assert!(!debouncer.try_accept(clock.now()));
    }

    #[test]
    fn steady_triggers_inside_the_interval_stay_suppressed() {
        let clock = ManualClock::new();
        let mut debouncer = Debouncer::new(Duration::from_millis(1500));
        let mut accepted = Vec::new();
        for _ in 0..5 {
            accepted.push(debouncer.try_accept(clock.now()));
            clock.advance(Duration::from_millis(1000));
        }
        assert_eq!(accepted, vec![true, false, false, false, false]);
        clock.advance(Duration::from_millis(500));
        assert!(debouncer.try_accept(clock.now()));
    }

    #[test]
    fn late_arriving_earlier_trigger_does_not_rewind() {
        let clock = ManualClock::new();
        let early = clock.now();
        clock.advance(Duration::from_millis(1000));
        let late = clock.now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1500));
        assert!(debouncer.try_accept(late));
        assert!(!debouncer.try_accept(early));
        assert!(debouncer.try_accept(late + Duration::from_millis(1500)));
    }
}
