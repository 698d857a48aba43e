//! Connection and message counters, mirrored into a prometheus registry, plus the periodic
//! health-check observer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::RealtimeHub;
use crate::error::RealtimeError;

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    /// Milliseconds, smoothed with `new = (old + sample) / 2`.
    pub average_response_time: f64,
    pub peak_connections: u64,
    pub total_disconnections: u64,
}

struct PromMetrics {
    total_connections: IntCounter,
    active_connections: IntGauge,
    peak_connections: IntGauge,
    total_disconnections: IntCounter,
    total_messages: IntCounter,
    average_response_time: Gauge,
    background_failures: IntCounter,
}

pub struct MetricsCollector {
    // One lock so the connect/disconnect counters are always read as a consistent set.
    state: Mutex<MetricsSnapshot>,
    registry: Registry,
    prom: PromMetrics,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, RealtimeError> {
        let registry = Registry::new();
        let prom = PromMetrics {
            total_connections: IntCounter::new(
                "realtime_connections_total",
                "Connections accepted since start",
            )?,
            active_connections: IntGauge::new(
                "realtime_active_connections",
                "Currently open connections",
            )?,
            peak_connections: IntGauge::new(
                "realtime_peak_connections",
                "Highest concurrent connection count",
            )?,
            total_disconnections: IntCounter::new(
                "realtime_disconnections_total",
                "Connections closed since start",
            )?,
            total_messages: IntCounter::new(
                "realtime_messages_total",
                "Inbound client events",
            )?,
            average_response_time: Gauge::new(
                "realtime_average_response_time_ms",
                "Smoothed auth/broadcast latency in milliseconds",
            )?,
            background_failures: IntCounter::new(
                "realtime_background_failures_total",
                "Supervised background tasks that returned an error",
            )?,
        };
        registry.register(Box::new(prom.total_connections.clone()))?;
        registry.register(Box::new(prom.active_connections.clone()))?;
        registry.register(Box::new(prom.peak_connections.clone()))?;
        registry.register(Box::new(prom.total_disconnections.clone()))?;
        registry.register(Box::new(prom.total_messages.clone()))?;
        registry.register(Box::new(prom.average_response_time.clone()))?;
        registry.register(Box::new(prom.background_failures.clone()))?;

        Ok(Self {
            state: Mutex::new(MetricsSnapshot::default()),
            registry,
            prom,
            started: Instant::now(),
            started_at: Utc::now(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MetricsSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the new active connection count.
    pub fn record_connect(&self) -> u64 {
        let mut s = self.lock();
        s.total_connections += 1;
        s.active_connections += 1;
        s.peak_connections = s.peak_connections.max(s.active_connections);
        self.prom.total_connections.inc();
        self.prom.active_connections.set(to_i64(s.active_connections));
        self.prom.peak_connections.set(to_i64(s.peak_connections));
        s.active_connections
    }

    /// Returns the new active connection count.
    pub fn record_disconnect(&self) -> u64 {
        let mut s = self.lock();
        s.active_connections = s.active_connections.saturating_sub(1);
        s.total_disconnections += 1;
        self.prom.total_disconnections.inc();
        self.prom.active_connections.set(to_i64(s.active_connections));
        s.active_connections
    }

    pub fn record_message(&self) {
        self.lock().total_messages += 1;
        self.prom.total_messages.inc();
    }

    /// Fold one latency sample (ms) into the average: `new = (old + sample) / 2`.
    pub fn record_response_time(&self, sample_ms: f64) {
        let mut s = self.lock();
        s.average_response_time = (s.average_response_time + sample_ms) / 2.0;
        self.prom.average_response_time.set(s.average_response_time);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.lock()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn background_failures(&self) -> IntCounter {
        self.prom.background_failures.clone()
    }

    /// Prometheus text exposition of every realtime metric.
    pub fn render(&self) -> Result<String, RealtimeError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub average_response_time: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Unix milliseconds.
    pub start_time: i64,
    pub peak_connections: u64,
    pub total_disconnections: u64,
}

/// On-demand stats query, shaped like the dashboard expects.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketStats {
    pub performance_metrics: PerformanceMetrics,
    pub connection_stats: ConnectionStats,
    pub guest_count: u64,
    pub online_users_count: usize,
    /// Milliseconds since start.
    pub uptime: u64,
}

impl RealtimeHub {
    pub fn socket_stats(&self) -> SocketStats {
        let m = self.metrics.snapshot();
        SocketStats {
            performance_metrics: PerformanceMetrics {
                total_connections: m.total_connections,
                active_connections: m.active_connections,
                total_messages: m.total_messages,
                average_response_time: m.average_response_time,
            },
            connection_stats: ConnectionStats {
                start_time: self.metrics.started_at().timestamp_millis(),
                peak_connections: m.peak_connections,
                total_disconnections: m.total_disconnections,
            },
            guest_count: self.registry.guest_count(),
            online_users_count: self.registry.online_user_count(),
            uptime: u64::try_from(self.metrics.uptime().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Log one health line. Reads only.
    pub fn log_health(&self) {
        let m = self.metrics.snapshot();
        tracing::info!(
            uptime_secs = self.metrics.uptime().as_secs(),
            active_connections = m.active_connections,
            registered = self.registry.connection_count(),
            rooms = self.rooms.room_count(),
            peak_connections = m.peak_connections,
            total_messages = m.total_messages,
            avg_response_ms = %format!("{:.2}", m.average_response_time),
            guest_count = self.registry.guest_count(),
            online_users = self.registry.online_user_count(),
            "realtime health check"
        );
    }
}

/// First check fires one `period` after start, then every `period`.
pub fn spawn_health_check(hub: Arc<RealtimeHub>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            hub.log_health();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_response_time_halves_towards_each_sample() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_response_time(10.0);
        assert_eq!(metrics.snapshot().average_response_time, 5.0);
        metrics.record_response_time(20.0);
        assert_eq!(metrics.snapshot().average_response_time, 12.5);
    }

    #[test]
    fn ema_from_zero_matches_dashboard_formula() {
        let metrics = MetricsCollector::new().unwrap();
        for sample in [10.0, 20.0] {
            metrics.record_response_time(sample);
        }
        let expected = ((0.0 + 10.0) / 2.0 + 20.0) / 2.0;
        assert_eq!(metrics.snapshot().average_response_time, expected);
    }

    #[test]
    fn active_connections_track_totals() {
        let metrics = MetricsCollector::new().unwrap();
        let ops = [true, true, false, true, false, false, true];
        for connect in ops {
            if connect {
                metrics.record_connect();
            } else {
                metrics.record_disconnect();
            }
            let s = metrics.snapshot();
            assert_eq!(s.active_connections, s.total_connections - s.total_disconnections);
        }
        let s = metrics.snapshot();
        assert_eq!(s.total_connections, 4);
        assert_eq!(s.peak_connections, 2);
        assert_eq!(s.active_connections, 1);
    }

    #[test]
    fn render_exposes_registered_metrics() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_connect();
        metrics.record_message();
        let text = metrics.render().unwrap();
        assert!(text.contains("realtime_connections_total 1"));
        assert!(text.contains("realtime_messages_total 1"));
        assert!(text.contains("realtime_average_response_time_ms"));
    }
}
