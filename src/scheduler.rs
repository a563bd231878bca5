/// Poll loop
/// Once per cycle: correct the clock, compute the recommendation, render it,
/// dispatch it if it changed, then sleep. Ticks never overlap and nothing runs
/// in the background of the loop itself.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::clock::{ClockError, LocalClock, TransitionTable, SECONDS_PER_YEAR};
use crate::config::Config;
use crate::display::{Frame, Panel};
use crate::health::PanelMetrics;
use crate::notify::{DispatchReport, NotificationState, Notifier};
use crate::suggestion::{Recommendation, SuggestionEngine};

/// Source of the current UTC epoch, in seconds
pub trait TimeSource {
    fn now_utc(&self) -> i64;
}

/// Host clock, assumed synchronised by the platform
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_utc(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Rendering,
    Waiting,
}

/// What one tick computed
#[derive(Debug)]
pub struct TickOutcome {
    pub clock: LocalClock,
    pub recommendation: Recommendation,
    pub frame: Frame,
    /// `None` when the recommendation had not changed
    pub report: Option<DispatchReport>,
}

/// Everything the loop owns between ticks
pub struct PollContext<T: TimeSource, P: Panel> {
    table: TransitionTable,
    engine: SuggestionEngine,
    notifier: Notifier,
    state: NotificationState,
    time: T,
    panel: P,
    metrics: Arc<PanelMetrics>,
    poll_interval: Duration,
    phase: Phase,
}

impl<T: TimeSource, P: Panel> PollContext<T, P> {
    pub fn new(
        table: TransitionTable,
        engine: SuggestionEngine,
        notifier: Notifier,
        time: T,
        panel: P,
        metrics: Arc<PanelMetrics>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            table,
            engine,
            notifier,
            state: NotificationState::new(),
            time,
            panel,
            metrics,
            poll_interval,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &NotificationState {
        &self.state
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run one cycle. Only clock resolution can fail; render and sink
    /// errors are logged and the tick completes regardless.
    pub async fn tick(&mut self) -> Result<TickOutcome, ClockError> {
        self.phase = Phase::Idle;
        let now = self.time.now_utc();
        let clock = self.table.apply_correction(now)?;
        let recommendation = self.engine.recommend(&clock);

        self.phase = Phase::Rendering;
        let frame = Frame::compose(&clock, &recommendation, self.engine.phrasebook());
        if let Err(e) = self.panel.render(&frame) {
            warn!("Render failed: {:#}", e);
        }

        let report = self
            .notifier
            .dispatch_if_changed(&recommendation, &mut self.state)
            .await;
        if let Some(report) = &report {
            info!(
                "{}:{:02}:{:02} {}",
                clock.hour, clock.minute, clock.second, report.message
            );
            if !report.all_delivered() {
                warn!(
                    "{} of {} sinks failed for \"{}\"",
                    report.failed.len(),
                    report.failed.len() + report.delivered.len(),
                    report.message
                );
            }
            self.metrics.record_dispatch(report);
        }

        self.metrics.record_tick(now);
        self.phase = Phase::Waiting;

        Ok(TickOutcome {
            clock,
            recommendation,
            frame,
            report,
        })
    }

    /// Tick forever. Returns only when the transition table no longer
    /// covers the current time.
    pub async fn run(mut self) -> ClockError {
        info!(
            "Poll loop started (every {})",
            format_duration(self.poll_interval)
        );

        loop {
            if let Err(e) = self.tick().await {
                error!("Cannot resolve local time: {}", e);
                return e;
            }
            debug!("Sleeping {:?}", self.poll_interval);
            sleep(self.poll_interval).await;
        }
    }
}

/// Initialisation phase: build the table, engine and sinks from `config` and
/// return a context ready to tick.
pub fn boot<T: TimeSource, P: Panel>(
    config: &Config,
    time: T,
    panel: P,
    metrics: Arc<PanelMetrics>,
) -> Result<PollContext<T, P>> {
    config.validate()?;

    let now = time.now_utc();
    let table = config.timezone.build(now)?;
    table
        .resolve_offset(now)
        .context("Transition table does not cover the current time")?;

    let remaining = table.coverage_end() - now;
    if remaining < SECONDS_PER_YEAR {
        warn!(
            "Transition table runs out in {}; regenerate it soon",
            format_duration(Duration::from_secs(remaining.max(0) as u64))
        );
    } else {
        debug!(
            "Transition table covers {} more",
            format_duration(Duration::from_secs(remaining as u64))
        );
    }

    let engine = SuggestionEngine::new(config.schedule(), config.locale);
    let notifier = Notifier::from_config(config)?;
    if notifier.sink_names().is_empty() {
        info!("No notification sinks configured; display only");
    }

    Ok(PollContext::new(
        table,
        engine,
        notifier,
        time,
        panel,
        metrics,
        Duration::from_secs(config.poll_interval_secs),
    ))
}

/// Format duration for logging
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let mins = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::TextPanel;
    use std::cell::Cell;
    use std::collections::HashMap;

    /// 2024-04-01 16:00 UTC, Monday 18:00 local
    const MONDAY_18H: i64 = 1711987200;

    struct FixedTime(Cell<i64>);

    impl TimeSource for FixedTime {
        fn now_utc(&self) -> i64 {
            self.0.get()
        }
    }

    struct BrokenPanel;

    impl Panel for BrokenPanel {
        fn render(&mut self, _frame: &Frame) -> Result<()> {
            anyhow::bail!("display disconnected")
        }
    }

    fn context_at(now: i64) -> PollContext<FixedTime, TextPanel<Vec<u8>>> {
        PollContext::new(
            TransitionTable::builtin(),
            SuggestionEngine::default(),
            Notifier::new(Duration::from_secs(1)),
            FixedTime(Cell::new(now)),
            TextPanel::new(Vec::new()),
            Arc::new(PanelMetrics::new()),
            Duration::from_secs(60),
        )
    }

    // === format_duration tests ===

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_secs(3660)), "1h 1m");
        assert_eq!(format_duration(Duration::from_secs(90061)), "1d 1h");
    }

    // === tick tests ===

    #[tokio::test]
    async fn test_tick_monday_evening() {
        let mut context = context_at(MONDAY_18H);
        assert_eq!(context.phase(), Phase::Idle);

        let outcome = context.tick().await.unwrap();

        assert_eq!(outcome.clock.weekday, 0);
        assert_eq!(outcome.clock.hour, 18);
        assert_eq!(outcome.recommendation.window_message, "after 22h, before 7h");
        assert_eq!(outcome.recommendation.start_message, "start in 8 hours");
        assert_eq!(outcome.frame.date_label, "Monday 1 April");
        assert_eq!(outcome.frame.time_label, "18:00");
        assert_eq!(outcome.frame.imperative_label, "schedule");
        assert!(outcome.report.is_some());
        assert_eq!(context.phase(), Phase::Waiting);
    }

    #[tokio::test]
    async fn test_second_tick_is_gated() {
        let mut context = context_at(MONDAY_18H);
        context.tick().await.unwrap();
        context.time.0.set(MONDAY_18H + 60);

        let outcome = context.tick().await.unwrap();
        assert!(outcome.report.is_none());
        assert_eq!(context.metrics.status().ticks, 2);
        assert_eq!(context.metrics.status().dispatches, 1);
    }

    #[tokio::test]
    async fn test_tick_renders_to_panel() {
        let mut context = context_at(MONDAY_18H);
        context.tick().await.unwrap();

        let output = String::from_utf8(context.panel().get_ref().clone()).unwrap();
        assert!(output.contains("Monday 1 April"));
        assert!(output.contains("start in 8 hours"));
    }

    #[tokio::test]
    async fn test_render_failure_does_not_stop_tick() {
        let mut context = PollContext::new(
            TransitionTable::builtin(),
            SuggestionEngine::default(),
            Notifier::new(Duration::from_secs(1)),
            FixedTime(Cell::new(MONDAY_18H)),
            BrokenPanel,
            Arc::new(PanelMetrics::new()),
            Duration::from_secs(60),
        );

        let outcome = context.tick().await.unwrap();
        assert!(outcome.report.is_some());
        assert_eq!(context.phase(), Phase::Waiting);
    }

    #[tokio::test]
    async fn test_tick_outside_table_fails() {
        let mut context = context_at(1_000_000_000);
        let err = context.tick().await.unwrap_err();
        assert!(matches!(err, ClockError::BeforeTable { .. }));
    }

    #[tokio::test]
    async fn test_run_returns_when_table_exhausted() {
        let context = context_at(TransitionTable::builtin().coverage_end() + 1);
        let err = context.run().await;
        assert!(matches!(err, ClockError::TableExhausted { .. }));
    }

    // === boot tests ===

    fn config(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_getter(|key| map.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_boot_defaults() {
        let context = boot(
            &config(&[]),
            FixedTime(Cell::new(MONDAY_18H)),
            TextPanel::new(Vec::new()),
            Arc::new(PanelMetrics::new()),
        )
        .unwrap();

        assert_eq!(context.poll_interval(), Duration::from_secs(60));
        assert_eq!(context.table(), &TransitionTable::builtin());
        assert!(context.state().last_dispatched().is_none());
    }

    #[test]
    fn test_boot_rejects_invalid_config() {
        let result = boot(
            &config(&[("OFF_PEAK_END_HOUR", "2")]),
            FixedTime(Cell::new(MONDAY_18H)),
            TextPanel::new(Vec::new()),
            Arc::new(PanelMetrics::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_boot_rejects_uncovered_time() {
        let result = boot(
            &config(&[]),
            FixedTime(Cell::new(1_000_000_000)),
            TextPanel::new(Vec::new()),
            Arc::new(PanelMetrics::new()),
        );
        let err = format!("{:#}", result.err().expect("boot should fail"));
        assert!(err.contains("does not cover"), "{}", err);
    }

    #[test]
    fn test_boot_with_zone_table() {
        let context = boot(
            &config(&[("TZ_NAME", "Europe/Paris"), ("TZ_HORIZON_YEARS", "2")]),
            FixedTime(Cell::new(MONDAY_18H)),
            TextPanel::new(Vec::new()),
            Arc::new(PanelMetrics::new()),
        )
        .unwrap();

        assert_eq!(context.table().resolve_offset(MONDAY_18H), Ok(7200));
    }
}
