use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde::ser::SerializeStruct;

/// A [`HashMap`] mapping limiter names to their [`LimiterStats`]
#[derive(Debug, Default, Serialize)]
pub struct LimiterStatsMap(HashMap<String, LimiterStats>);

impl LimiterStatsMap {
    /// Sort limiter statistics by admission count (descending order)
    #[must_use]
    pub fn sorted(&self) -> Vec<(String, LimiterStats)> {
        let mut sorted: Vec<_> = self.0.clone().into_iter().collect();
        sorted.sort_by(|(a_name, a), (b_name, b)| {
            b.total_admissions
                .cmp(&a.total_admissions)
                .then_with(|| a_name.cmp(b_name))
        });
        sorted
    }

    /// Statistics of one limiter
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&LimiterStats> {
        self.0.get(name)
    }

    /// Number of limiters in the map
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, LimiterStats>> for LimiterStatsMap {
    fn from(value: HashMap<String, LimiterStats>) -> Self {
        Self(value)
    }
}

/// Point-in-time snapshot of a [`crate::ratelimit::RateLimiter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    /// Live concurrency cap
    pub concurrency_cap: usize,
    /// Throughput cap per window, `None` for unlimited
    pub window_cap: Option<usize>,
    /// Length of the throughput window
    pub window: Duration,
    /// Units currently admitted
    pub holders: usize,
    /// Admissions inside the trailing window
    pub current_window_count: usize,
    /// Admissions since creation or the last reset
    pub total_admissions: u64,
}

impl LimiterStats {
    /// Fraction of the window quota already used (0.0 to 1.0), `None` if unlimited
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn window_utilization(&self) -> Option<f64> {
        self.window_cap
            .map(|cap| self.current_window_count as f64 / cap as f64)
    }

    /// Get human-readable summary of the stats
    #[must_use]
    pub fn summary(&self) -> String {
        let window = self.window_cap.map_or_else(
            || "unlimited".to_string(),
            |cap| {
                format!(
                    "{}/{} per {}s",
                    self.current_window_count,
                    cap,
                    self.window.as_secs_f64()
                )
            },
        );
        format!(
            "{}/{} held, {} admitted, window: {}",
            self.holders, self.concurrency_cap, self.total_admissions, window
        )
    }
}

impl Serialize for LimiterStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("LimiterStats", 7)?;
        s.serialize_field("concurrency_cap", &self.concurrency_cap)?;
        s.serialize_field("window_cap", &self.window_cap)?;
        s.serialize_field("window_ms", &self.window.as_millis())?;
        s.serialize_field("holders", &self.holders)?;
        s.serialize_field("current_window_count", &self.current_window_count)?;
        s.serialize_field("total_admissions", &self.total_admissions)?;
        s.serialize_field("window_utilization", &self.window_utilization())?;
        s.end()
    }
}

/// Counters of a [`crate::ratelimit::AdaptiveController`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdaptiveStats {
    /// Live concurrency cap
    pub current_concurrency: usize,
    /// Successes since the last rate limit or recovery step
    pub consecutive_successes: u32,
    /// Successes since creation or the last reset
    pub total_successes: u64,
    /// Rate-limit events since creation or the last reset
    pub total_rate_limits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total_admissions: u64, current_window_count: usize) -> LimiterStats {
        LimiterStats {
            concurrency_cap: 5,
            window_cap: Some(60),
            window: Duration::from_secs(60),
            holders: 2,
            current_window_count,
            total_admissions,
        }
    }

    #[test]
    fn test_window_utilization() {
        assert!((stats(0, 15).window_utilization().unwrap() - 0.25).abs() < f64::EPSILON);

        let unlimited = LimiterStats {
            window_cap: None,
            ..stats(0, 15)
        };
        assert_eq!(unlimited.window_utilization(), None);
    }

    #[test]
    fn test_summary_formatting() {
        let summary = stats(42, 30).summary();
        assert!(summary.contains("2/5 held"));
        assert!(summary.contains("42 admitted"));
        assert!(summary.contains("30/60 per 60s"));
    }

    #[test]
    fn test_sorted_by_admissions() {
        let map = LimiterStatsMap::from(HashMap::from([
            ("gemini".to_string(), stats(3, 0)),
            ("openai".to_string(), stats(10, 0)),
            ("anthropic".to_string(), stats(3, 0)),
        ]));

        let names: Vec<_> = map.sorted().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["openai", "anthropic", "gemini"]);
    }
}
