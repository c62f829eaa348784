//! One pass of the scheduling loop over the instrument × interval universe
//!
//! Evaluations run first (in parallel when configured) and touch no shared
//! state apart from cooldown reads. Decisions and their side effects
//! (sink notifications, cooldown records, budget counters) are then applied
//! one key at a time in universe order.

use anyhow::Result;
use chrono::{DateTime, Utc};
use itertools::{iproduct, Itertools};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::alignment::Alignment;
use crate::budget::DailyBudget;
use crate::config::Config;
use crate::cooldown::{CooldownBook, CooldownStatus, CooldownStore};
use crate::data::{self, BarSource};
use crate::pipeline::{Evaluation, Pipeline};
use crate::store::SqliteStore;
use crate::types::{Instrument, Interval, Strength};

// =============================================================================
// Decisions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NoData { bars: usize },
    LoadFailed { error: String },
    Cooldown { until: DateTime<Utc> },
    Rejected { gate: String },
    LowProbability { probability: f64, min: f64 },
    NoPositionSize,
    BudgetExhausted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoData { bars } => write!(f, "no data ({} bars)", bars),
            SkipReason::LoadFailed { error } => write!(f, "load failed: {}", error),
            SkipReason::Cooldown { until } => write!(f, "cooldown until {}", until.format("%H:%M:%S")),
            SkipReason::Rejected { gate } => write!(f, "rejected ({})", gate),
            SkipReason::LowProbability { probability, min } => {
                write!(f, "probability {:.0}% < {:.0}%", probability, min)
            }
            SkipReason::NoPositionSize => write!(f, "position size is zero"),
            SkipReason::BudgetExhausted => write!(f, "daily budget exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Alert,
    Warning { change_pct: f64 },
    Log,
    Skip(SkipReason),
}

/// Decision for one key, with the evaluation when one was made
#[derive(Debug, Clone, Serialize)]
pub struct KeyReport {
    pub instrument: Instrument,
    pub interval: Interval,
    pub decision: Decision,
    pub evaluation: Option<Evaluation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub at: DateTime<Utc>,
    pub keys: Vec<KeyReport>,
    pub alignments: Vec<Alignment>,
    pub budget: DailyBudget,
    /// Scan did not run because the budget was already spent
    pub short_circuited: bool,
}

impl ScanReport {
    pub fn alerts(&self) -> usize {
        self.count(|d| matches!(d, Decision::Alert))
    }

    pub fn warnings(&self) -> usize {
        self.count(|d| matches!(d, Decision::Warning { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|d| matches!(d, Decision::Skip(_)))
    }

    fn count(&self, pred: impl Fn(&Decision) -> bool) -> usize {
        self.keys.iter().filter(|k| pred(&k.decision)).count()
    }

    pub fn decision_for(&self, instrument: &Instrument, interval: Interval) -> Option<&Decision> {
        self.keys
            .iter()
            .find(|k| &k.instrument == instrument && k.interval == interval)
            .map(|k| &k.decision)
    }
}

// =============================================================================
// Alert Sinks
// =============================================================================

/// Outbound side of a decision. Only called for approved alerts and
/// warnings, never for rejected evaluations.
pub trait AlertSink: Send + Sync {
    fn alert(&self, evaluation: &Evaluation, at: DateTime<Utc>) -> Result<()>;

    fn warning(&self, evaluation: &Evaluation, change_pct: f64, at: DateTime<Utc>) -> Result<()>;
}

impl<T: AlertSink + ?Sized> AlertSink for Arc<T> {
    fn alert(&self, evaluation: &Evaluation, at: DateTime<Utc>) -> Result<()> {
        (**self).alert(evaluation, at)
    }

    fn warning(&self, evaluation: &Evaluation, change_pct: f64, at: DateTime<Utc>) -> Result<()> {
        (**self).warning(evaluation, change_pct, at)
    }
}

/// Writes decisions to the tracing log
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn alert(&self, evaluation: &Evaluation, _at: DateTime<Utc>) -> Result<()> {
        info!("🚨 ALERT {}", evaluation.breakdown().trim_end());
        Ok(())
    }

    fn warning(&self, evaluation: &Evaluation, change_pct: f64, _at: DateTime<Utc>) -> Result<()> {
        warn!(
            "⚠️ {} {} dropped {:.2}% on the last bar (score {:.2})",
            evaluation.instrument, evaluation.interval, change_pct, evaluation.total_score
        );
        Ok(())
    }
}

/// Alert rows go to the audit table; warnings are not stored
impl AlertSink for SqliteStore {
    fn alert(&self, evaluation: &Evaluation, at: DateTime<Utc>) -> Result<()> {
        self.save_alert(evaluation, at).map(|_| ())
    }

    fn warning(&self, _evaluation: &Evaluation, _change_pct: f64, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Alert(Evaluation),
    Warning(Evaluation, f64),
}

/// Collects notifications in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl AlertSink for MemorySink {
    fn alert(&self, evaluation: &Evaluation, _at: DateTime<Utc>) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
            .push(Notification::Alert(evaluation.clone()));
        Ok(())
    }

    fn warning(&self, evaluation: &Evaluation, change_pct: f64, _at: DateTime<Utc>) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
            .push(Notification::Warning(evaluation.clone(), change_pct));
        Ok(())
    }
}

// =============================================================================
// Scanner
// =============================================================================

/// Result of the read-only phase for one key
enum Assessed {
    Skipped(SkipReason),
    Evaluated {
        evaluation: Box<Evaluation>,
        change_pct: Option<f64>,
    },
}

pub struct Scanner<S: CooldownStore> {
    pipeline: Pipeline,
    source: Box<dyn BarSource>,
    cooldowns: CooldownBook<S>,
    sinks: Vec<Box<dyn AlertSink>>,
}

impl<S: CooldownStore> Scanner<S> {
    pub fn new(config: Config, source: Box<dyn BarSource>, cooldown_store: S) -> Self {
        let cooldowns = CooldownBook::new(cooldown_store, config.cooldown.clone());
        Self {
            pipeline: Pipeline::new(config),
            source,
            cooldowns,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &Config {
        self.pipeline.config()
    }

    pub fn cooldowns(&self) -> &CooldownBook<S> {
        &self.cooldowns
    }

    /// Run one scan at `now`, threading the daily budget through.
    pub fn scan(&self, budget: &mut DailyBudget, now: DateTime<Utc>) -> ScanReport {
        let cfg = self.config();
        budget.roll(now, &cfg.budget);

        let mut report = ScanReport {
            at: now,
            keys: Vec::new(),
            alignments: Vec::new(),
            budget: *budget,
            short_circuited: false,
        };

        if budget.is_exhausted(&cfg.budget) {
            info!(
                "⛔ Daily budget exhausted ({} alerts, {} positions), skipping scan",
                budget.alerts_sent, budget.concurrent_positions
            );
            report.short_circuited = true;
            return report;
        }

        let keys: Vec<(Instrument, Interval)> =
            iproduct!(cfg.instruments(), cfg.universe.intervals.iter().copied()).collect();
        info!("📡 Scanning {} keys", keys.len());

        let assessed: Vec<Assessed> = if cfg.scheduler.parallel {
            keys.par_iter()
                .map(|(instrument, interval)| self.assess(instrument, *interval, now))
                .collect()
        } else {
            keys.iter()
                .map(|(instrument, interval)| self.assess(instrument, *interval, now))
                .collect()
        };

        for ((instrument, interval), assessed) in keys.into_iter().zip(assessed) {
            let (decision, evaluation) = match assessed {
                Assessed::Skipped(reason) => (Decision::Skip(reason), None),
                Assessed::Evaluated { evaluation, change_pct } => {
                    let decision = self.decide(&evaluation, change_pct, budget, now);
                    (decision, Some(*evaluation))
                }
            };
            log_decision(&instrument, interval, &decision, evaluation.as_ref());
            report.keys.push(KeyReport {
                instrument,
                interval,
                decision,
                evaluation,
            });
        }

        report.alignments = alignments(&report.keys);
        for alignment in &report.alignments {
            if alignment.aligned.is_actionable() {
                info!("🧭 {} aligned {} across intervals", alignment.instrument, alignment.aligned);
            }
        }

        report.budget = *budget;
        info!(
            "Scan complete: {} alerts, {} warnings, {} skipped ({} alerts sent today)",
            report.alerts(),
            report.warnings(),
            report.skipped(),
            budget.alerts_sent
        );
        report
    }

    /// Load, cooldown check and evaluate. No writes.
    fn assess(&self, instrument: &Instrument, interval: Interval, now: DateTime<Utc>) -> Assessed {
        let min_bars = self.config().gates.min_bars;
        let bars = match self.source.load(instrument, interval) {
            Ok(Some(bars)) => bars,
            Ok(None) => return Assessed::Skipped(SkipReason::NoData { bars: 0 }),
            Err(e) => {
                warn!("Failed to load {} {}: {:#}", instrument, interval, e);
                return Assessed::Skipped(SkipReason::LoadFailed { error: format!("{:#}", e) });
            }
        };
        if bars.len() < min_bars {
            return Assessed::Skipped(SkipReason::NoData { bars: bars.len() });
        }

        if let CooldownStatus::InCooldown { until } = self.cooldowns.status(instrument, interval, now) {
            return Assessed::Skipped(SkipReason::Cooldown { until });
        }

        let evaluation = self.pipeline.evaluate(instrument, interval, &bars, now);
        Assessed::Evaluated {
            evaluation: Box::new(evaluation),
            change_pct: data::last_change_pct(&bars),
        }
    }

    fn decide(
        &self,
        eval: &Evaluation,
        change_pct: Option<f64>,
        budget: &mut DailyBudget,
        now: DateTime<Utc>,
    ) -> Decision {
        let cfg = self.config();

        if let Some(reason) = eval.rejection_reason() {
            return Decision::Skip(SkipReason::Rejected { gate: reason });
        }
        if eval.probability < cfg.probability.min_probability {
            return Decision::Skip(SkipReason::LowProbability {
                probability: eval.probability,
                min: cfg.probability.min_probability,
            });
        }

        if eval.direction.is_actionable() && eval.strength >= Strength::Medium {
            if !eval.position_size.is_positive() {
                return Decision::Skip(SkipReason::NoPositionSize);
            }
            if budget.is_exhausted(&cfg.budget) {
                return Decision::Skip(SkipReason::BudgetExhausted);
            }
            self.notify(|sink| sink.alert(eval, now));
            self.record_cooldown(eval, now);
            budget.record_alert();
            return Decision::Alert;
        }

        match change_pct {
            Some(change) if change < cfg.alerts.warning_drop_pct => {
                self.notify(|sink| sink.warning(eval, change, now));
                self.record_cooldown(eval, now);
                Decision::Warning { change_pct: change }
            }
            _ => Decision::Log,
        }
    }

    fn notify(&self, send: impl Fn(&dyn AlertSink) -> Result<()>) {
        for sink in &self.sinks {
            if let Err(e) = send(sink.as_ref()) {
                warn!("Alert sink failed: {:#}", e);
            }
        }
    }

    fn record_cooldown(&self, eval: &Evaluation, now: DateTime<Utc>) {
        if let Err(e) = self.cooldowns.record_alert(&eval.instrument, eval.interval, now) {
            warn!(
                "Failed to record cooldown for {} {}: {:#}",
                eval.instrument, eval.interval, e
            );
        }
    }
}

fn log_decision(instrument: &Instrument, interval: Interval, decision: &Decision, eval: Option<&Evaluation>) {
    match (decision, eval) {
        (Decision::Skip(reason), _) => debug!("⏭ {} ({}) {}", instrument, interval, reason),
        (Decision::Log, Some(eval)) => info!(
            "📊 {} ({}) score {:.2} | p {:.0}% | rr {:.2} | {}",
            instrument,
            interval,
            eval.total_score,
            eval.probability,
            eval.levels.map(|l| l.reward_risk).unwrap_or(0.0),
            eval.direction
        ),
        _ => {}
    }
}

/// Per-instrument alignment over every evaluated interval
fn alignments(keys: &[KeyReport]) -> Vec<Alignment> {
    let grouped: BTreeMap<Instrument, Vec<_>> = keys
        .iter()
        .filter_map(|k| k.evaluation.as_ref().map(|e| (k.instrument.clone(), (k.interval, e.direction))))
        .into_group_map()
        .into_iter()
        .collect();

    grouped
        .into_iter()
        .map(|(instrument, directions)| Alignment::new(instrument, directions))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::MemoryCooldownStore;
    use crate::data::MemoryBarSource;
    use crate::types::Bar;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    fn small_config() -> Config {
        let mut config = Config::default();
        config.universe.instruments = vec!["BTC-USD".into(), "ETH-USD".into()];
        config.universe.intervals = vec![Interval::H1];
        config.scheduler.parallel = false;
        config
    }

    fn flat_bars(n: usize) -> Vec<Bar> {
        let start = now() - Duration::hours(n as i64);
        (0..n)
            .map(|i| Bar::new_unchecked(start + Duration::hours(i as i64), 100.0, 100.0, 100.0, 100.0, 0.0))
            .collect()
    }

    #[test]
    fn test_missing_and_short_series_skip() {
        let source = MemoryBarSource::new();
        source.insert(&Instrument::new("ETH-USD"), Interval::H1, flat_bars(30));
        let scanner = Scanner::new(small_config(), Box::new(source), MemoryCooldownStore::new());

        let mut budget = DailyBudget::new(now(), &scanner.config().budget);
        let report = scanner.scan(&mut budget, now());

        assert_eq!(
            report.decision_for(&Instrument::new("BTC-USD"), Interval::H1),
            Some(&Decision::Skip(SkipReason::NoData { bars: 0 }))
        );
        assert_eq!(
            report.decision_for(&Instrument::new("ETH-USD"), Interval::H1),
            Some(&Decision::Skip(SkipReason::NoData { bars: 30 }))
        );
        assert_eq!(report.skipped(), 2);
    }

    #[test]
    fn test_rejection_has_no_side_effects() {
        let source = MemoryBarSource::new();
        source.insert(&Instrument::new("BTC-USD"), Interval::H1, flat_bars(80));
        let sink = Arc::new(MemorySink::new());
        let scanner = Scanner::new(small_config(), Box::new(source), MemoryCooldownStore::new())
            .with_sink(Box::new(sink.clone()));

        let mut budget = DailyBudget::new(now(), &scanner.config().budget);
        let report = scanner.scan(&mut budget, now());

        assert!(matches!(
            report.decision_for(&Instrument::new("BTC-USD"), Interval::H1),
            Some(Decision::Skip(SkipReason::Rejected { .. }))
        ));
        assert!(sink.sent().is_empty());
        assert!(scanner.cooldowns().store().is_empty());
        assert_eq!(budget.alerts_sent, 0);
    }

    #[test]
    fn test_exhausted_budget_short_circuits() {
        let scanner = Scanner::new(small_config(), Box::new(MemoryBarSource::new()), MemoryCooldownStore::new());
        let mut budget = DailyBudget::new(now(), &scanner.config().budget);
        budget.alerts_sent = 12;

        let report = scanner.scan(&mut budget, now());
        assert!(report.short_circuited);
        assert!(report.keys.is_empty());

        // next local day starts fresh
        let tomorrow = now() + Duration::days(1);
        let report = scanner.scan(&mut budget, tomorrow);
        assert!(!report.short_circuited);
        assert_eq!(report.keys.len(), 2);
    }

    #[test]
    fn test_cooldown_skips_before_evaluation() {
        let source = MemoryBarSource::new();
        source.insert(&Instrument::new("BTC-USD"), Interval::H1, flat_bars(80));
        let scanner = Scanner::new(small_config(), Box::new(source), MemoryCooldownStore::new());
        scanner
            .cooldowns()
            .record_alert(&Instrument::new("BTC-USD"), Interval::H1, now() - Duration::minutes(5))
            .unwrap();

        let mut budget = DailyBudget::new(now(), &scanner.config().budget);
        let report = scanner.scan(&mut budget, now());
        assert_eq!(
            report.decision_for(&Instrument::new("BTC-USD"), Interval::H1),
            Some(&Decision::Skip(SkipReason::Cooldown {
                until: now() + Duration::minutes(15)
            }))
        );
    }
}
