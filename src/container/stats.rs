//! CPU and memory figures derived from a single stats payload

use crate::models::{ContainerStatsSnapshot, StatsSample};

/// Cores the CPU figure is scaled by: per-core entries, or online CPUs when the engine
/// reports none (cgroup v2 hosts)
pub fn core_count(sample: &StatsSample) -> u32 {
    if sample.per_core_count > 0 {
        sample.per_core_count
    } else {
        sample.online_cpus.unwrap_or(0)
    }
}

/// CPU usage in percent of one core, in `0..=100 * cores`
///
/// Both deltas come from the current and previous readings of the same payload. The result is
/// 0 unless both are strictly positive, which also covers counter resets.
pub fn cpu_percent(sample: &StatsSample) -> f64 {
    let cpu_delta = i128::from(sample.cpu.total_usage) - i128::from(sample.precpu.total_usage);
    let system_delta =
        i128::from(sample.cpu.system_usage) - i128::from(sample.precpu.system_usage);

    if cpu_delta <= 0 || system_delta <= 0 {
        return 0.0;
    }

    let ratio = (cpu_delta as f64 / system_delta as f64).min(1.0);
    ratio * f64::from(core_count(sample)) * 100.0
}

pub fn snapshot(id: &str, sample: &StatsSample) -> ContainerStatsSnapshot {
    ContainerStatsSnapshot {
        id: id.to_string(),
        cpu_usage: cpu_percent(sample),
        memory_usage: sample.memory_usage,
        memory_limit: sample.memory_limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CpuCounters;
    use proptest::prelude::*;

    fn sample(cpu: (u64, u64), precpu: (u64, u64), cores: u32) -> StatsSample {
        StatsSample {
            cpu: CpuCounters {
                total_usage: cpu.0,
                system_usage: cpu.1,
            },
            precpu: CpuCounters {
                total_usage: precpu.0,
                system_usage: precpu.1,
            },
            per_core_count: cores,
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_percent_formula() {
        // 200 of 1000 host ticks on 4 cores
        let s = sample((400, 2000), (200, 1000), 4);
        assert!((cpu_percent(&s) - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_when_no_progress() {
        assert_eq!(cpu_percent(&sample((200, 2000), (200, 1000), 4)), 0.0);
        assert_eq!(cpu_percent(&sample((400, 1000), (200, 1000), 4)), 0.0);
        // Counter reset: previous reading larger than current
        assert_eq!(cpu_percent(&sample((100, 2000), (200, 1000), 4)), 0.0);
    }

    #[test]
    fn test_online_cpus_fallback() {
        let mut s = sample((400, 2000), (200, 1000), 0);
        assert_eq!(cpu_percent(&s), 0.0);

        s.online_cpus = Some(2);
        assert!((cpu_percent(&s) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_copies_memory() {
        let mut s = sample((400, 2000), (200, 1000), 1);
        s.memory_usage = 512;
        s.memory_limit = 2048;

        let snap = snapshot("abc", &s);
        assert_eq!(snap.id, "abc");
        assert_eq!(snap.memory_usage, 512);
        assert_eq!(snap.memory_limit, 2048);
        assert!((snap.cpu_usage - 20.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn cpu_percent_within_bounds(
            cpu in (any::<u64>(), any::<u64>()),
            precpu in (any::<u64>(), any::<u64>()),
            cores in 0u32..512,
            online_cpus in proptest::option::of(0u32..512),
        ) {
            let mut s = sample(cpu, precpu, cores);
            s.online_cpus = online_cpus;
            let pct = cpu_percent(&s);
            prop_assert!(pct >= 0.0);
            prop_assert!(pct <= 100.0 * f64::from(core_count(&s)));
        }

        #[test]
        fn cpu_percent_zero_on_non_positive_delta(
            total in any::<u64>(),
            system in any::<u64>(),
            back in any::<u64>(),
            cores in 1u32..512,
        ) {
            // Tie or regression on the container counter
            let s = sample((total.saturating_sub(back), system), (total, system.saturating_sub(1)), cores);
            prop_assert_eq!(cpu_percent(&s), 0.0);

            // Tie or regression on the system counter
            let s = sample((total, system.saturating_sub(back)), (total.saturating_sub(1), system), cores);
            prop_assert_eq!(cpu_percent(&s), 0.0);
        }
    }
}
