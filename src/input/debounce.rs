//! Debounce filter for a sampled digital line
//!
//! A new level is accepted only after it has been observed without
//! interruption for the whole debounce interval. Bounce shorter than the
//! interval never produces an edge.

use std::time::{Duration, Instant};

/// A logical transition of a debounced line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Inactive to active
    Press,
    /// Active to inactive
    Release,
}

/// Stable-window debouncer
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    stable: bool,
    candidate: bool,
    candidate_since: Instant,
}

impl Debouncer {
    pub fn new(initial: bool, interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            stable: initial,
            candidate: initial,
            candidate_since: now,
        }
    }

    /// The debounced level
    pub fn state(&self) -> bool {
        self.stable
    }

    /// Feed one sample; returns an edge once the new level has settled
    pub fn update(&mut self, level: bool, now: Instant) -> Option<Edge> {
        if level != self.candidate {
            self.candidate = level;
            self.candidate_since = now;
        }

        if self.candidate == self.stable {
            return None;
        }

        if now.saturating_duration_since(self.candidate_since) < self.interval {
            return None;
        }

        self.stable = self.candidate;
        Some(if self.stable { Edge::Press } else { Edge::Release })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(50);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_settled_press_fires_once() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(false, INTERVAL, t0);

        assert_eq!(d.update(true, t0 + ms(1)), None);
        assert_eq!(d.update(true, t0 + ms(30)), None);
        assert_eq!(d.update(true, t0 + ms(51)), Some(Edge::Press));
        assert_eq!(d.update(true, t0 + ms(80)), None);
        assert!(d.state());
    }

    #[test]
    fn test_bounce_shorter_than_interval_is_ignored() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(false, INTERVAL, t0);

        // Chatter every 5ms for 45ms, ending released
        let mut level = false;
        for step in 1..=9 {
            level = !level;
            assert_eq!(d.update(level, t0 + ms(step * 5)), None);
        }
        assert_eq!(d.update(false, t0 + ms(200)), None);
        assert!(!d.state());
    }

    #[test]
    fn test_chatter_then_hold_yields_single_press() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(false, INTERVAL, t0);
        let mut edges = Vec::new();

        let mut level = false;
        for step in 1..=7 {
            level = !level;
            edges.extend(d.update(level, t0 + ms(step * 4)));
        }
        // Last chatter sample left the line high at 28ms; hold it
        for step in 0..40 {
            edges.extend(d.update(true, t0 + ms(29 + step * 5)));
        }

        assert_eq!(edges, vec![Edge::Press]);
    }

    #[test]
    fn test_release_after_press() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(true, INTERVAL, t0);

        assert_eq!(d.update(false, t0 + ms(10)), None);
        assert_eq!(d.update(false, t0 + ms(70)), Some(Edge::Release));
        assert!(!d.state());
    }
}
