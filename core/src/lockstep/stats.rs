//! Producer statistics tracking

use std::time::Instant;

/// Statistics tracked by each step producer
#[derive(Debug, Default, Clone)]
pub struct ProducerStats {
    /// Steps that produced a clean record
    pub completed: usize,

    /// Steps whose record was flagged with an error
    pub failed: usize,

    /// Producer start time
    pub started_at: Option<Instant>,

    /// Producer end time
    pub ended_at: Option<Instant>,
}

impl ProducerStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Total steps executed
    pub fn total_steps(&self) -> usize {
        self.completed + self.failed
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Record one step by whether its record was flagged
    pub fn record_step(&mut self, failed: bool) {
        if failed {
            self.failed += 1;
        } else {
            self.completed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_stats_defaults() {
        let stats = ProducerStats::default();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.failed, 0);
        assert!(stats.started_at.is_none());
        assert!(stats.elapsed().is_none());
    }

    #[test]
    fn test_producer_stats_record_step() {
        let mut stats = ProducerStats::new();
        stats.record_step(false);
        stats.record_step(false);
        stats.record_step(true);

        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_steps(), 3);
    }

    #[test]
    fn test_producer_stats_start_stop() {
        let mut stats = ProducerStats::new();
        stats.start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        stats.stop();

        assert!(stats.elapsed().unwrap() >= std::time::Duration::from_millis(10));
    }
}
