#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use std::time::{Duration, Instant};
#[cfg(feature = "cli")]
use sysinfo::{RefreshKind, System};

#[cfg(feature = "cli")]
#[derive(Debug, Clone)]
pub struct HostStats {
    pub cpu_count: usize,
    pub load_one: f64,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub elapsed_time: Duration,
}

/// 記錄主機資源；VM 會吃掉主機的 CPU 與記憶體，開機前後各看一次
#[cfg(feature = "cli")]
pub struct HostMonitor {
    system: Mutex<System>,
    start_time: Instant,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl HostMonitor {
    pub fn new(enabled: bool) -> Self {
        let system = if enabled {
            System::new_with_specifics(RefreshKind::everything())
        } else {
            System::new()
        };

        Self {
            system: Mutex::new(system),
            start_time: Instant::now(),
            enabled,
        }
    }

    pub fn get_stats(&self) -> Option<HostStats> {
        if !self.enabled {
            return None;
        }

        let mut system = self.system.lock().ok()?;
        system.refresh_memory();

        Some(HostStats {
            cpu_count: system.cpus().len(),
            load_one: System::load_average().one,
            total_memory_mb: system.total_memory() / 1024 / 1024,
            available_memory_mb: system.available_memory() / 1024 / 1024,
            elapsed_time: self.start_time.elapsed(),
        })
    }

    pub fn log_stats(&self, phase: &str) {
        if let Some(stats) = self.get_stats() {
            tracing::info!(
                "📊 {} - CPUs: {}, Load: {:.2}, Memory: {}MB free of {}MB, Time: {:?}",
                phase,
                stats.cpu_count,
                stats.load_one,
                stats.available_memory_mb,
                stats.total_memory_mb,
                stats.elapsed_time
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(feature = "cli")]
impl Default for HostMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

// 非 CLI 建置時的空實現
#[cfg(not(feature = "cli"))]
#[derive(Default)]
pub struct HostMonitor;

#[cfg(not(feature = "cli"))]
impl HostMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn log_stats(&self, _phase: &str) {}

    pub fn is_enabled(&self) -> bool {
        false
    }
}
