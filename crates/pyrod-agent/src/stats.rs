//! Resource statistics sampling
//!
//! A single background ticker walks the container registry every five
//! seconds, takes a one-shot engine sample per container, normalizes it into
//! user-facing units, publishes it on the instance's room, and caches it as
//! the instance's last sample. Sampling errors are swallowed so one
//! misbehaving container cannot poison the ticker.

use crate::events::{Event, EventBus};
use crate::registry::ContainerRegistry;
use crate::runtime::{EngineStats, Runtime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Normalized stats published to subscribers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSample {
    /// Whole percent, clamped to [0, 100]
    pub cpu: u64,
    pub memory: MemoryStats,
    pub network: NetworkStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    /// MiB
    pub used: u64,
    /// MiB
    pub total: u64,
    /// Clamped to [0, 100]
    pub percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Cumulative bytes received on the first interface
    pub rx: u64,
    /// Cumulative bytes transmitted on the first interface
    pub tx: u64,
}

/// Normalize one raw engine sample.
///
/// CPU is the container's share of the system delta scaled by online CPUs;
/// a zero pre-sample (first read after start) reports 0 rather than a
/// garbage spike.
pub fn normalize(raw: &EngineStats) -> StatsSample {
    let cpu = if raw.precpu_total == 0 {
        0
    } else {
        let cpu_delta = raw.cpu_total.saturating_sub(raw.precpu_total) as f64;
        let sys_delta = raw.cpu_system.saturating_sub(raw.precpu_system) as f64;
        if sys_delta <= 0.0 {
            0
        } else {
            let percent = cpu_delta / sys_delta * f64::from(raw.online_cpus) * 100.0;
            percent.clamp(0.0, 100.0).round() as u64
        }
    };

    let used = raw.memory_usage >> 20;
    let total = raw.memory_limit >> 20;
    let percent = if raw.memory_limit == 0 {
        0.0
    } else {
        (raw.memory_usage as f64 / raw.memory_limit as f64 * 100.0).clamp(0.0, 100.0)
    };

    StatsSample {
        cpu,
        memory: MemoryStats {
            used,
            total,
            percent,
        },
        network: NetworkStats {
            rx: raw.network_rx,
            tx: raw.network_tx,
        },
    }
}

/// Background sampler over the supervised-container registry
pub struct StatsSampler {
    runtime: Arc<dyn Runtime>,
    registry: Arc<ContainerRegistry>,
    bus: Arc<EventBus>,
}

impl StatsSampler {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        registry: Arc<ContainerRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            runtime,
            registry,
            bus,
        }
    }

    /// Run until the shutdown flag flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        tracing::info!(interval_secs = SAMPLE_INTERVAL.as_secs(), "stats sampler started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("stats sampler shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sample_all().await;
                }
            }
        }
    }

    /// One pass over a registry snapshot; a container removed mid-pass just
    /// yields an error that is dropped.
    pub async fn sample_all(&self) {
        for (id, container) in self.registry.entries().await {
            match self.runtime.stats_once(&container).await {
                Ok(raw) => {
                    let sample = normalize(&raw);
                    self.registry.set_stats(&id, sample.clone()).await;
                    self.bus.publish(&id, Event::ServerStats(sample)).await;
                }
                Err(e) => {
                    tracing::debug!(server = %id, error = %e, "stats sample failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContainerHandle;
    use crate::runtime::MockRuntime;

    fn raw() -> EngineStats {
        EngineStats {
            cpu_total: 2_000_000,
            cpu_system: 10_000_000,
            precpu_total: 1_000_000,
            precpu_system: 8_000_000,
            online_cpus: 2,
            memory_usage: 512 * 1024 * 1024,
            memory_limit: 1024 * 1024 * 1024,
            network_rx: 1500,
            network_tx: 800,
        }
    }

    #[test]
    fn cpu_percent_formula() {
        // delta cpu 1e6 over delta sys 2e6, 2 cores -> 100%
        let sample = normalize(&raw());
        assert_eq!(sample.cpu, 100);
    }

    #[test]
    fn cpu_zero_when_no_presample() {
        let mut r = raw();
        r.precpu_total = 0;
        assert_eq!(normalize(&r).cpu, 0);
    }

    #[test]
    fn cpu_clamped_to_hundred() {
        let mut r = raw();
        r.online_cpus = 64;
        assert_eq!(normalize(&r).cpu, 100);
    }

    #[test]
    fn cpu_zero_when_system_delta_missing() {
        let mut r = raw();
        r.cpu_system = r.precpu_system;
        assert_eq!(normalize(&r).cpu, 0);
    }

    #[test]
    fn memory_in_mib_with_percent() {
        let sample = normalize(&raw());
        assert_eq!(sample.memory.used, 512);
        assert_eq!(sample.memory.total, 1024);
        assert!((sample.memory.percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn memory_percent_zero_without_limit() {
        let mut r = raw();
        r.memory_limit = 0;
        let sample = normalize(&r);
        assert_eq!(sample.memory.percent, 0.0);
    }

    #[test]
    fn network_counters_pass_through() {
        let sample = normalize(&raw());
        assert_eq!(sample.network.rx, 1500);
        assert_eq!(sample.network.tx, 800);
    }

    #[tokio::test]
    async fn sampler_publishes_and_caches() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.seed_container("pyro-server-s1", true).await;

        let registry = Arc::new(ContainerRegistry::new());
        registry
            .register(
                "s1",
                ContainerHandle {
                    container_name: "pyro-server-s1".to_string(),
                    log_task: None,
                    promotion_task: None,
                },
            )
            .await;

        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe("s1").await;

        let sampler = StatsSampler::new(runtime, Arc::clone(&registry), Arc::clone(&bus));
        sampler.sample_all().await;

        assert!(registry.last_stats("s1").await.is_some());
        assert!(matches!(rx.try_recv().unwrap(), Event::ServerStats(_)));
    }

    #[tokio::test]
    async fn sampler_swallows_errors_for_gone_containers() {
        let runtime = Arc::new(MockRuntime::new());
        let registry = Arc::new(ContainerRegistry::new());
        registry
            .register(
                "ghost",
                ContainerHandle {
                    container_name: "pyro-server-ghost".to_string(),
                    log_task: None,
                    promotion_task: None,
                },
            )
            .await;

        let bus = Arc::new(EventBus::new());
        let sampler = StatsSampler::new(runtime, registry, bus);
        // Must not panic or error out
        sampler.sample_all().await;
    }
}
