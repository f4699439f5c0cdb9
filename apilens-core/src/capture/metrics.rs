use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureMetrics {
    pub events_seen: u64,
    pub requests_classified: u64,
    pub requests_discarded: u64,
    pub responses_correlated: u64,
    pub responses_dropped: u64,
    pub rate_limited_responses: u64,
    pub failures: u64,
}

impl CaptureMetrics {
    pub fn record_event(&mut self) {
        self.events_seen = self.events_seen.saturating_add(1);
    }

    pub fn record_classification(&mut self) {
        self.requests_classified = self.requests_classified.saturating_add(1);
    }

    pub fn record_discard(&mut self) {
        self.requests_discarded = self.requests_discarded.saturating_add(1);
    }

    pub fn record_correlation(&mut self, rate_limited: bool) {
        self.responses_correlated = self.responses_correlated.saturating_add(1);
        if rate_limited {
            self.rate_limited_responses = self.rate_limited_responses.saturating_add(1);
        }
    }

    pub fn record_dropped_response(&mut self) {
        self.responses_dropped = self.responses_dropped.saturating_add(1);
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn classification_rate(&self) -> f64 {
        if self.events_seen == 0 {
            0.0
        } else {
            (self.requests_classified as f64 / self.events_seen as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_saturate_instead_of_wrapping() {
        let mut metrics = CaptureMetrics {
            events_seen: u64::MAX,
            ..CaptureMetrics::default()
        };
        metrics.record_event();
        assert_eq!(metrics.events_seen, u64::MAX);

        metrics.record_failure();
        assert_eq!(metrics.failures, 1);
    }

    #[test]
    fn classification_rate_handles_empty_captures() {
        let metrics = CaptureMetrics::default();
        assert_eq!(metrics.classification_rate(), 0.0);

        let mut metrics = CaptureMetrics::default();
        for _ in 0..4 {
            metrics.record_event();
        }
        metrics.record_classification();
        assert_eq!(metrics.classification_rate(), 25.0);
    }
}
