//! Process resource sampling from /proc
//!
//! Reads the current process's resident memory and CPU time directly from
//! procfs. CPU usage is a delta between consecutive samples, expressed as a
//! percentage of one core.

use std::fs;
use std::time::Duration;

use tokio::time::Instant;

/// Kernel clock ticks per second (USER_HZ); fixed at 100 on Linux
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// Samples this process's memory and CPU usage
pub struct ResourceSampler {
    last_cpu: Option<(Instant, u64)>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self { last_cpu: None }
    }

    /// Resident set size in MiB, if procfs is readable
    pub fn rss_mb(&self) -> Option<u64> {
        let status = fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss_kb(&status).map(|kb| kb / 1024)
    }

    /// CPU usage since the previous call as a percentage of one core
    ///
    /// The first call establishes a baseline and returns `None`.
    pub fn cpu_percent(&mut self) -> Option<f64> {
        let stat = fs::read_to_string("/proc/self/stat").ok()?;
        let ticks = parse_cpu_ticks(&stat)?;
        let now = Instant::now();

        let sample = self.last_cpu.replace((now, ticks));
        let (prev_at, prev_ticks) = sample?;

        let wall = now.saturating_duration_since(prev_at);
        if wall < Duration::from_millis(100) {
            return None;
        }

        let used = (ticks.saturating_sub(prev_ticks)) as f64 / CLOCK_TICKS_PER_SEC;
        Some(used / wall.as_secs_f64() * 100.0)
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the `VmRSS` value (in kB) from /proc/self/status content
fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// Sum utime and stime (fields 14 and 15) from /proc/self/stat content
///
/// The comm field may contain spaces and parentheses, so fields are counted
/// from after the closing paren.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    // rest starts at field 3 (state); utime and stime are fields 14 and 15
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vm_rss() {
        let status = "Name:\tcuratord\nVmPeak:\t  20000 kB\nVmRSS:\t  12288 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss_kb(status), Some(12288));
        assert_eq!(parse_vm_rss_kb("Name:\tcuratord\n"), None);
    }

    #[test]
    fn parses_cpu_ticks_with_spaced_comm() {
        let stat = "1234 (cura tord) S 1 1234 1234 0 -1 4194304 500 0 0 0 250 150 0 0 20 0 4 0 100 0 0";
        assert_eq!(parse_cpu_ticks(stat), Some(400));
    }

    #[test]
    fn first_cpu_sample_is_baseline() {
        let mut sampler = ResourceSampler::new();
        // On non-Linux filesystems this returns None either way; on Linux the
        // first sample only records the baseline.
        assert!(sampler.cpu_percent().is_none());
    }

    #[test]
    fn rss_reads_on_linux() {
        let sampler = ResourceSampler::new();
        if let Some(mb) = sampler.rss_mb() {
            assert!(mb > 0);
        }
    }
}
