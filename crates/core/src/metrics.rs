//! RPC rate and latency metrics.
//!
//! Each metric key owns a [`Timer`]: an event count, 1/5/15-minute
//! exponentially-weighted rates (5-second tick, the classic load-average
//! decay), min/mean/max, and latency percentiles backed by an HDR histogram
//! with microsecond resolution.
//!
//! Key scheme:
//!
//! - `rpc.rate.<TYPE>.success`
//! - `rpc.rate.<TYPE>.error`
//! - `rpc.rate.overall` (aggregate over every request)
//!
//! The registry is injected, never a process global, so tests can build a
//! fresh one per case.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::proto::MessageType;

/// Aggregate timer key covering every request type.
pub const OVERALL_RATE_KEY: &str = "rpc.rate.overall";

const EWMA_TICK: Duration = Duration::from_secs(5);
/// Histogram range: 1µs .. 60s at 3 significant figures.
const HISTOGRAM_MAX_MICROS: u64 = 60_000_000;

pub fn success_rate_key(msg_type: MessageType) -> String {
    format!("rpc.rate.{}.success", msg_type.name())
}

pub fn error_rate_key(msg_type: MessageType) -> String {
    format!("rpc.rate.{}.error", msg_type.name())
}

/// One exponentially-weighted moving average, ticked every 5 seconds.
struct Ewma {
    alpha: f64,
    rate: f64,
    initialized: bool,
}

impl Ewma {
    fn minutes(minutes: f64) -> Self {
        Ewma {
            alpha: 1.0 - (-EWMA_TICK.as_secs_f64() / 60.0 / minutes).exp(),
            rate: 0.0,
            initialized: false,
        }
    }

    fn tick(&mut self, uncounted: u64) {
        let instant_rate = uncounted as f64 / EWMA_TICK.as_secs_f64();
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }

    /// Events per second.
    fn rate(&self) -> f64 {
        self.rate
    }
}

struct TimerInner {
    count: u64,
    sum_micros: u64,
    min_micros: u64,
    max_micros: u64,
    histogram: Histogram<u64>,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
    uncounted: u64,
    last_tick: Instant,
}

impl TimerInner {
    fn catch_up_ticks(&mut self, now: Instant) {
        while now.duration_since(self.last_tick) >= EWMA_TICK {
            self.m1.tick(self.uncounted);
            self.m5.tick(self.uncounted);
            self.m15.tick(self.uncounted);
            self.uncounted = 0;
            self.last_tick += EWMA_TICK;
        }
    }
}

/// Point-in-time view of a [`Timer`]. Latencies in milliseconds, rates in
/// events per second.
#[derive(Debug, Clone, Default)]
pub struct TimerSnapshot {
    pub count: u64,
    pub m1_rate: f64,
    pub m5_rate: f64,
    pub m15_rate: f64,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
}

/// Rate + latency timer. Thread-safe; updates take the timer's own lock,
/// never the registry's.
pub struct Timer {
    inner: Mutex<TimerInner>,
}

impl Timer {
    fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, HISTOGRAM_MAX_MICROS, 3)
            .expect("static histogram bounds");
        Timer {
            inner: Mutex::new(TimerInner {
                count: 0,
                sum_micros: 0,
                min_micros: 0,
                max_micros: 0,
                histogram,
                m1: Ewma::minutes(1.0),
                m5: Ewma::minutes(5.0),
                m15: Ewma::minutes(15.0),
                uncounted: 0,
                last_tick: Instant::now(),
            }),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let micros = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        let mut inner = self.inner.lock();
        inner.catch_up_ticks(Instant::now());

        inner.min_micros = if inner.count == 0 { micros } else { inner.min_micros.min(micros) };
        inner.max_micros = inner.max_micros.max(micros);
        inner.count += 1;
        inner.uncounted += 1;
        inner.sum_micros = inner.sum_micros.saturating_add(micros);
        inner.histogram.saturating_record(micros.max(1));
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let to_ms = |micros: u64| micros as f64 / 1000.0;
        let mut inner = self.inner.lock();
        inner.catch_up_ticks(Instant::now());

        let mean_ms = if inner.count == 0 {
            0.0
        } else {
            to_ms(inner.sum_micros) / inner.count as f64
        };
        TimerSnapshot {
            count: inner.count,
            m1_rate: inner.m1.rate(),
            m5_rate: inner.m5.rate(),
            m15_rate: inner.m15.rate(),
            min_ms: to_ms(inner.min_micros),
            mean_ms,
            max_ms: to_ms(inner.max_micros),
            p50_ms: to_ms(inner.histogram.value_at_quantile(0.50)),
            p75_ms: to_ms(inner.histogram.value_at_quantile(0.75)),
            p90_ms: to_ms(inner.histogram.value_at_quantile(0.90)),
            p99_ms: to_ms(inner.histogram.value_at_quantile(0.99)),
        }
    }
}

/// Registry of RPC timers, keyed by metric name.
pub struct RpcMetrics {
    timers: Mutex<BTreeMap<String, Arc<Timer>>>,
}

impl RpcMetrics {
    pub fn new() -> Self {
        RpcMetrics { timers: Mutex::new(BTreeMap::new()) }
    }

    pub fn get_or_register(&self, key: &str) -> Arc<Timer> {
        let mut timers = self.timers.lock();
        match timers.get(key) {
            Some(timer) => Arc::clone(timer),
            None => {
                let timer = Arc::new(Timer::new());
                timers.insert(key.to_string(), Arc::clone(&timer));
                timer
            }
        }
    }

    /// Record one handled request into its per-type timer and the aggregate.
    pub fn observe(&self, msg_type: MessageType, success: bool, elapsed: Duration) {
        let key = if success { success_rate_key(msg_type) } else { error_rate_key(msg_type) };
        self.get_or_register(&key).record(elapsed);
        self.get_or_register(OVERALL_RATE_KEY).record(elapsed);
    }

    /// Snapshot of the aggregate timer.
    pub fn overall(&self) -> TimerSnapshot {
        self.get_or_register(OVERALL_RATE_KEY).snapshot()
    }

    /// Visit a snapshot of every registered timer. The registry lock is not
    /// held while snapshotting.
    pub fn each(&self, mut f: impl FnMut(&str, &TimerSnapshot)) {
        let timers: Vec<(String, Arc<Timer>)> =
            self.timers.lock().iter().map(|(k, t)| (k.clone(), Arc::clone(t))).collect();
        for (key, timer) in timers {
            f(&key, &timer.snapshot());
        }
    }
}

impl Default for RpcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        assert_eq!(success_rate_key(MessageType::Login), "rpc.rate.LOGIN.success");
        // the error key must use the distinct error suffix
        assert_eq!(error_rate_key(MessageType::Login), "rpc.rate.LOGIN.error");
        assert_ne!(error_rate_key(MessageType::Info), success_rate_key(MessageType::Info));
    }

    #[test]
    fn record_updates_count_and_latency() {
        let timer = Timer::new();
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(30));

        let snap = timer.snapshot();
        assert_eq!(snap.count, 2);
        assert!(snap.min_ms >= 9.0 && snap.min_ms <= 11.0, "min {}", snap.min_ms);
        assert!(snap.max_ms >= 29.0 && snap.max_ms <= 31.0, "max {}", snap.max_ms);
        assert!(snap.mean_ms > 15.0 && snap.mean_ms < 25.0, "mean {}", snap.mean_ms);
        assert!(snap.p99_ms >= snap.p50_ms);
    }

    #[test]
    fn observe_feeds_type_and_aggregate_timers() {
        let metrics = RpcMetrics::new();
        metrics.observe(MessageType::Info, true, Duration::from_millis(1));
        metrics.observe(MessageType::Info, false, Duration::from_millis(1));
        metrics.observe(MessageType::Login, true, Duration::from_millis(1));

        let mut keys = Vec::new();
        metrics.each(|key, snap| keys.push((key.to_string(), snap.count)));
        assert_eq!(
            keys,
            vec![
                ("rpc.rate.INFO.error".to_string(), 1),
                ("rpc.rate.INFO.success".to_string(), 1),
                ("rpc.rate.LOGIN.success".to_string(), 1),
                ("rpc.rate.overall".to_string(), 3),
            ]
        );
        assert_eq!(metrics.overall().count, 3);
    }

    #[test]
    fn empty_timer_snapshot_is_zeroed() {
        let snap = Timer::new().snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.mean_ms, 0.0);
        assert_eq!(snap.m1_rate, 0.0);
    }
}
