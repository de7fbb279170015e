use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind};

/// Environment variable listing the GPUs visible to this process, e.g. `0,1`.
pub const CUDA_VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";

pub struct SystemInfo {
    info: sysinfo::System,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            info: sysinfo::System::new_with_specifics(
                RefreshKind::new()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            ),
        }
    }
}

impl SystemInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of CPU cores usable by this process.
    ///
    /// Prefers the physical core count and falls back to the scheduler's parallelism hint.
    pub fn cpu_count(&self) -> u64 {
        self.info
            .physical_core_count()
            .or_else(|| std::thread::available_parallelism().ok().map(usize::from))
            .map_or(1, |x| x as u64)
    }

    /// Total memory in bytes, honoring cgroup limits when running in a container.
    pub fn total_memory(&self) -> u64 {
        if let Some(cgroup) = self.info.cgroup_limits() {
            cgroup.total_memory
        } else {
            self.info.total_memory()
        }
    }

    /// Number of CUDA devices visible to this process.
    pub fn gpu_count(&self) -> usize {
        parse_visible_devices(std::env::var(CUDA_VISIBLE_DEVICES).ok().as_deref())
    }
}

fn parse_visible_devices(value: Option<&str>) -> usize {
    match value.map(str::trim) {
        None | Some("" | "-1" | "none" | "NoDevFiles") => 0,
        Some(devices) => devices
            .split(',')
            .filter(|d| !d.trim().is_empty())
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_visible_devices, SystemInfo};

    #[test]
    fn visible_devices_are_counted() {
        assert_eq!(parse_visible_devices(None), 0);
        assert_eq!(parse_visible_devices(Some("")), 0);
        assert_eq!(parse_visible_devices(Some("-1")), 0);
        assert_eq!(parse_visible_devices(Some("0")), 1);
        assert_eq!(parse_visible_devices(Some("0, 1,3")), 3);
    }

    #[test]
    fn host_reports_at_least_one_cpu() {
        let info = SystemInfo::new();
        assert!(info.cpu_count() >= 1);
        assert!(info.total_memory() > 0);
    }
}
