//! Liveness and resource watchdog
//!
//! Supervises the executor from outside its own logic: polls process memory
//! and CPU plus the heartbeat the executor updates on every completed
//! transition. A breach is returned to the caller as a [`LivenessFailure`],
//! and the binary responds by exiting with [`RESTART_EXIT_CODE`] so the
//! process manager (systemd restart policy or equivalent) performs a full
//! restart, the one recovery path that guarantees a clean execution
//! context. In-process recovery is deliberately not attempted.

mod resources;

pub use resources::ResourceSampler;

use std::time::Duration;

use curator_engine::{EngineStatus, Phase};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Exit code signalling the supervisor to restart the process
pub const RESTART_EXIT_CODE: i32 = 70;

/// Consecutive over-ceiling CPU samples before declaring a failure
const CPU_STRIKE_LIMIT: u32 = 3;

/// A liveness breach; always fatal to the process
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LivenessFailure {
    #[error("heartbeat stale for {age_secs:.0}s (limit {limit_secs}s) while a scene is running")]
    StaleHeartbeat { age_secs: f64, limit_secs: u64 },

    #[error("memory use {used_mb} MiB exceeds ceiling {limit_mb} MiB")]
    MemoryExceeded { used_mb: u64, limit_mb: u64 },

    #[error("CPU use {percent:.1}% exceeded ceiling {limit:.1}% on consecutive checks")]
    CpuExceeded { percent: f64, limit: f64 },
}

/// Watchdog thresholds
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    /// Heartbeat age that counts as a hang while a scene is running
    pub heartbeat_timeout: Duration,
    pub max_memory_mb: u64,
    pub max_cpu_percent: f64,
}

/// The watchdog task
pub struct Monitor {
    settings: MonitorSettings,
    heartbeat: watch::Receiver<Instant>,
    status: watch::Receiver<EngineStatus>,
    sampler: ResourceSampler,
    cpu_strikes: u32,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        heartbeat: watch::Receiver<Instant>,
        status: watch::Receiver<EngineStatus>,
    ) -> Self {
        Self {
            settings,
            heartbeat,
            status,
            sampler: ResourceSampler::new(),
            cpu_strikes: 0,
        }
    }

    /// Poll until a breach occurs, then return it
    pub async fn run(mut self) -> LivenessFailure {
        let mut ticker = tokio::time::interval(self.settings.check_interval);
        // The first tick completes immediately; use it as the baseline.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Some(failure) = self.check() {
                warn!(failure = %failure, "Liveness check failed");
                return failure;
            }
        }
    }

    /// One health check pass; `None` means healthy
    pub fn check(&mut self) -> Option<LivenessFailure> {
        if let Some(used_mb) = self.sampler.rss_mb() {
            if used_mb > self.settings.max_memory_mb {
                return Some(LivenessFailure::MemoryExceeded {
                    used_mb,
                    limit_mb: self.settings.max_memory_mb,
                });
            }
        }

        if let Some(percent) = self.sampler.cpu_percent() {
            if percent > self.settings.max_cpu_percent {
                self.cpu_strikes += 1;
                if self.cpu_strikes >= CPU_STRIKE_LIMIT {
                    return Some(LivenessFailure::CpuExceeded {
                        percent,
                        limit: self.settings.max_cpu_percent,
                    });
                }
            } else {
                self.cpu_strikes = 0;
            }
        }

        // A long state legitimately goes minutes between transitions; the
        // heartbeat only counts while a scene is actually running, and the
        // timeout must exceed the longest authored state.
        if scene_running(&self.status.borrow()) {
            let age = self.heartbeat.borrow().elapsed();
            if age > self.settings.heartbeat_timeout {
                return Some(LivenessFailure::StaleHeartbeat {
                    age_secs: age.as_secs_f64(),
                    limit_secs: self.settings.heartbeat_timeout.as_secs(),
                });
            }
        }

        debug!("Health check passed");
        None
    }
}

fn scene_running(status: &EngineStatus) -> bool {
    matches!(status.phase, Phase::Entering | Phase::Active | Phase::Exiting)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MonitorSettings {
        MonitorSettings {
            check_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(30),
            // Ceilings far above anything a test process reaches, so only
            // the heartbeat rule can trip.
            max_memory_mb: u64::MAX,
            max_cpu_percent: f64::MAX,
        }
    }

    fn running_status() -> EngineStatus {
        let mut status = EngineStatus::idle();
        status.phase = Phase::Active;
        status
    }

    #[tokio::test(start_paused = true)]
    async fn stale_heartbeat_fails_only_while_running() {
        let (heartbeat_tx, heartbeat_rx) = watch::channel(Instant::now());
        let (status_tx, status_rx) = watch::channel(EngineStatus::idle());

        let mut monitor = Monitor::new(settings(), heartbeat_rx, status_rx);

        // Idle engine: a stale heartbeat is fine.
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(monitor.check(), None);

        // Running scene with a fresh beat: fine.
        status_tx.send_replace(running_status());
        heartbeat_tx.send_replace(Instant::now());
        assert_eq!(monitor.check(), None);

        // Running scene, beat goes stale past the limit: breach.
        tokio::time::advance(Duration::from_secs(31)).await;
        let failure = monitor.check().expect("stale heartbeat must fail");
        assert!(matches!(failure, LivenessFailure::StaleHeartbeat { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_beats_keep_the_monitor_quiet() {
        let (heartbeat_tx, heartbeat_rx) = watch::channel(Instant::now());
        let (_status_tx, status_rx) = watch::channel(running_status());

        let mut monitor = Monitor::new(settings(), heartbeat_rx, status_rx);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(20)).await;
            heartbeat_tx.send_replace(Instant::now());
            assert_eq!(monitor.check(), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn memory_ceiling_trips_immediately() {
        let (_heartbeat_tx, heartbeat_rx) = watch::channel(Instant::now());
        let (_status_tx, status_rx) = watch::channel(EngineStatus::idle());

        let mut tight = settings();
        tight.max_memory_mb = 0;
        let mut monitor = Monitor::new(tight, heartbeat_rx, status_rx);

        // Any real process has nonzero RSS, so a zero ceiling must trip on
        // systems where procfs is available.
        if let Some(failure) = monitor.check() {
            assert!(matches!(failure, LivenessFailure::MemoryExceeded { .. }));
        }
    }
}
