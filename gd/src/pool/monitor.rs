//! Resource monitor - counting semaphore with telemetry
//!
//! Tracks slot usage for the pool. Only the driver task touches it, so
//! plain mutation is safe; it carries no locks of its own.

use tracing::debug;

/// Telemetry snapshot from the monitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorMetrics {
    pub max_concurrency: usize,
    pub current_concurrency: usize,
    pub available_slots: usize,
    pub peak_concurrency: usize,
    /// Arithmetic mean of concurrency sampled at every allocate/release
    pub average_concurrency: f64,
    pub total_allocations: u64,
    pub total_releases: u64,
    pub utilization: f64,
}

/// Bounded slot counter for in-flight operations
#[derive(Debug)]
pub struct ResourceMonitor {
    max_concurrency: usize,
    in_use: usize,
    peak_concurrency: usize,
    total_allocations: u64,
    total_releases: u64,
    sample_sum: u64,
    sample_count: u64,
}

impl ResourceMonitor {
    /// Create a monitor with the given capacity (at least 1)
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            in_use: 0,
            peak_concurrency: 0,
            total_allocations: 0,
            total_releases: 0,
            sample_sum: 0,
            sample_count: 0,
        }
    }

    fn sample(&mut self) {
        self.sample_sum += self.in_use as u64;
        self.sample_count += 1;
    }

    /// Whether `n` slots can be allocated right now
    pub fn can_allocate(&self, n: usize) -> bool {
        n <= self.available_slots()
    }

    /// Take `n` slots; false (and no change) when over capacity
    pub fn allocate(&mut self, n: usize) -> bool {
        if !self.can_allocate(n) {
            debug!(n, in_use = self.in_use, "ResourceMonitor::allocate: rejected");
            return false;
        }

        self.in_use += n;
        self.peak_concurrency = self.peak_concurrency.max(self.in_use);
        self.total_allocations += n as u64;
        self.sample();
        true
    }

    /// Return `n` slots, clamping at zero
    pub fn release(&mut self, n: usize) {
        self.in_use = self.in_use.saturating_sub(n);
        self.total_releases += n as u64;
        self.sample();
    }

    /// Slots currently free
    pub fn available_slots(&self) -> usize {
        self.max_concurrency - self.in_use
    }

    /// Slots currently in use
    pub fn current_concurrency(&self) -> usize {
        self.in_use
    }

    /// Highest concurrency observed since construction or reset
    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency
    }

    /// Percentage of capacity in use, in [0, 100]
    pub fn utilization(&self) -> f64 {
        (self.in_use as f64 / self.max_concurrency as f64) * 100.0
    }

    /// Whether every slot is taken
    pub fn is_fully_utilized(&self) -> bool {
        self.in_use == self.max_concurrency
    }

    /// Whether no slot is taken
    pub fn is_idle(&self) -> bool {
        self.in_use == 0
    }

    /// Snapshot of all counters
    pub fn metrics(&self) -> MonitorMetrics {
        let average_concurrency = if self.sample_count == 0 {
            0.0
        } else {
            self.sample_sum as f64 / self.sample_count as f64
        };

        MonitorMetrics {
            max_concurrency: self.max_concurrency,
            current_concurrency: self.in_use,
            available_slots: self.available_slots(),
            peak_concurrency: self.peak_concurrency,
            average_concurrency,
            total_allocations: self.total_allocations,
            total_releases: self.total_releases,
            utilization: self.utilization(),
        }
    }

    /// Zero every counter, keeping the capacity
    pub fn reset(&mut self) {
        self.in_use = 0;
        self.peak_concurrency = 0;
        self.total_allocations = 0;
        self.total_releases = 0;
        self.sample_sum = 0;
        self.sample_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let mut monitor = ResourceMonitor::new(3);

        assert!(monitor.allocate(2));
        assert_eq!(monitor.current_concurrency(), 2);
        assert_eq!(monitor.available_slots(), 1);

        monitor.release(1);
        assert_eq!(monitor.current_concurrency(), 1);
    }

    #[test]
    fn test_over_allocation_is_rejected_unchanged() {
        let mut monitor = ResourceMonitor::new(2);

        assert!(monitor.allocate(2));
        assert!(!monitor.allocate(1));
        assert_eq!(monitor.current_concurrency(), 2);
        assert_eq!(monitor.metrics().total_allocations, 2);
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let mut monitor = ResourceMonitor::new(2);
        monitor.allocate(1);

        monitor.release(5);
        assert_eq!(monitor.current_concurrency(), 0);
        assert_eq!(monitor.metrics().total_releases, 5);
    }

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let mut monitor = ResourceMonitor::new(4);

        monitor.allocate(3);
        monitor.release(2);
        monitor.allocate(1);

        assert_eq!(monitor.peak_concurrency(), 3);
    }

    #[test]
    fn test_utilization_bounds() {
        let mut monitor = ResourceMonitor::new(4);
        assert_eq!(monitor.utilization(), 0.0);
        assert!(monitor.is_idle());

        monitor.allocate(4);
        assert_eq!(monitor.utilization(), 100.0);
        assert!(monitor.is_fully_utilized());
    }

    #[test]
    fn test_average_concurrency_event_mean() {
        let mut monitor = ResourceMonitor::new(4);

        // Samples: 1 (alloc), 2 (alloc), 1 (release) -> mean 4/3
        monitor.allocate(1);
        monitor.allocate(1);
        monitor.release(1);

        let metrics = monitor.metrics();
        assert!((metrics.average_concurrency - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let mut monitor = ResourceMonitor::new(4);
        monitor.allocate(3);
        monitor.reset();

        let metrics = monitor.metrics();
        assert_eq!(metrics.current_concurrency, 0);
        assert_eq!(metrics.peak_concurrency, 0);
        assert_eq!(metrics.total_allocations, 0);
        assert_eq!(metrics.average_concurrency, 0.0);
        assert_eq!(metrics.max_concurrency, 4);
    }

    #[test]
    fn test_capacity_floor_of_one() {
        let monitor = ResourceMonitor::new(0);
        assert!(monitor.can_allocate(1));
    }
}
