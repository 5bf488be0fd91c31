//! Once-semantics - admission records for rate-limited triggers.
//!
//! The same [`OnceRecord`] backs the bot-wide scope (held by the execution
//! gate) and the per-caller scope (held by the session state store).

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// How often a trigger may fire within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnceRule {
    /// Exactly once, ever
    Ever,
    /// At most once per rolling interval
    Every(Duration),
}

/// Last admission of one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnceMark {
    Fired,
    /// Next admission allowed at this instant
    Until(Instant),
}

/// Per-scope table `trigger name -> mark`. Marks are only removed by `clear`.
#[derive(Debug, Clone, Default)]
pub struct OnceRecord {
    marks: HashMap<String, OnceMark>,
}

impl OnceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `name` under `rule` at `now`, recording the admission.
    pub fn admit(&mut self, name: &str, rule: OnceRule, now: Instant) -> bool {
        let allowed = match self.marks.get(name) {
            None => true,
            Some(OnceMark::Fired) => false,
            Some(OnceMark::Until(next)) => now >= *next,
        };
        if !allowed {
            return false;
        }

        let mark = match rule {
            OnceRule::Ever => OnceMark::Fired,
            OnceRule::Every(interval) => OnceMark::Until(now + interval),
        };
        self.marks.insert(name.to_string(), mark);
        true
    }

    pub fn mark(&self, name: &str) -> Option<OnceMark> {
        self.marks.get(name).copied()
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ever_admits_once() {
        let mut record = OnceRecord::new();
        let now = Instant::now();
        assert!(record.admit("start", OnceRule::Ever, now));
        assert!(!record.admit("start", OnceRule::Ever, now + Duration::from_secs(3600)));
        assert!(record.admit("help", OnceRule::Ever, now));
    }

    #[test]
    fn test_interval_window_restarts_from_admission() {
        let mut record = OnceRecord::new();
        let t0 = Instant::now();
        let minute = Duration::from_secs(60);
        assert!(record.admit("ping", OnceRule::Every(minute), t0));
        assert!(!record.admit("ping", OnceRule::Every(minute), t0 + Duration::from_secs(30)));

        let t1 = t0 + Duration::from_secs(61);
        assert!(record.admit("ping", OnceRule::Every(minute), t1));
        assert_eq!(record.mark("ping"), Some(OnceMark::Until(t1 + minute)));
        assert!(!record.admit("ping", OnceRule::Every(minute), t0 + Duration::from_secs(100)));
    }
}
