//! # Rate Limiter
//!
//! Process-wide gate on agent posting volume: per-agent daily cap, global
//! daily cap, and a per-(agent, thread) cooldown for non-user-initiated
//! posts. Counters are shared across all concurrent swarm runs.
//!
//! Daily rollover is lazy: every check compares the stored UTC date stamp
//! with the current one and resets the counters on mismatch. No timer.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::swarm::events::{EventBus, SwarmEvent, SwarmEventKind};

/// Limits enforced by the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Posts one agent may make per UTC day
    pub per_agent_daily: u32,
    /// Posts all agents together may make per UTC day
    pub global_daily: u32,
    /// Minimum gap between two non-user-initiated posts from the same
    /// agent in the same thread
    pub thread_cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_agent_daily: 10,
            global_daily: 100,
            thread_cooldown: Duration::from_secs(180),
        }
    }
}

/// Cooldown entries older than this are pruned at rollover
const STALE_COOLDOWN: Duration = Duration::from_secs(3600);

struct Counters {
    /// UTC date stamp ("%Y-%m-%d") the counters belong to
    date: String,
    per_agent: HashMap<String, u32>,
    global: u32,
    /// (agent, thread) -> last post time
    last_thread_post: HashMap<(String, String), DateTime<Utc>>,
}

impl Counters {
    fn new(date: String) -> Self {
        Self {
            date,
            per_agent: HashMap::new(),
            global: 0,
            last_thread_post: HashMap::new(),
        }
    }
}

fn utc_date_stamp() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Gate on whether an agent may post right now
pub struct RateLimiter {
    config: RateLimitConfig,
    counters: Mutex<Counters>,
    event_bus: Option<Arc<EventBus>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            counters: Mutex::new(Counters::new(utc_date_stamp())),
            event_bus: None,
        }
    }

    /// Emit rate-limit-hit events on this bus (best-effort)
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Reset counters if the UTC day rolled over since the last call
    ///
    /// Also prunes cooldown entries older than an hour so the map stays
    /// bounded.
    fn roll_over_if_needed(&self, counters: &mut Counters) {
        let today = utc_date_stamp();
        if counters.date == today {
            return;
        }

        tracing::info!(
            previous = %counters.date,
            current = %today,
            "Rate limit day rolled over, resetting counters"
        );
        counters.date = today;
        counters.per_agent.clear();
        counters.global = 0;

        let stale_before = Utc::now()
            - ChronoDuration::from_std(STALE_COOLDOWN).unwrap_or_else(|_| ChronoDuration::hours(1));
        counters
            .last_thread_post
            .retain(|_, last| *last > stale_before);
    }

    /// Whether `agent_id` may post right now
    ///
    /// Checks in order: per-agent daily cap, global daily cap, then (for
    /// non-user-initiated posts in a thread) the thread cooldown. A denial
    /// emits a rate-limit-hit event; a publish failure never propagates.
    pub fn can_post(&self, agent_id: &str, thread_id: Option<&str>, user_initiated: bool) -> bool {
        let mut counters = self.counters.lock().unwrap();
        self.roll_over_if_needed(&mut counters);

        let agent_count = counters.per_agent.get(agent_id).copied().unwrap_or(0);
        if agent_count >= self.config.per_agent_daily {
            drop(counters);
            self.deny(agent_id, thread_id, "agent_daily_cap");
            return false;
        }

        if counters.global >= self.config.global_daily {
            drop(counters);
            self.deny(agent_id, thread_id, "global_daily_cap");
            return false;
        }

        if let (Some(thread), false) = (thread_id, user_initiated) {
            let key = (agent_id.to_string(), thread.to_string());
            if let Some(last) = counters.last_thread_post.get(&key) {
                let cooldown = ChronoDuration::from_std(self.config.thread_cooldown)
                    .unwrap_or_else(|_| ChronoDuration::seconds(180));
                if Utc::now() - *last < cooldown {
                    drop(counters);
                    self.deny(agent_id, thread_id, "thread_cooldown");
                    return false;
                }
            }
        }

        true
    }

    /// Record a successful post
    ///
    /// Must be called only after a generation actually produced output,
    /// never speculatively.
    pub fn record_post(&self, agent_id: &str, thread_id: Option<&str>) {
        let mut counters = self.counters.lock().unwrap();
        self.roll_over_if_needed(&mut counters);

        *counters.per_agent.entry(agent_id.to_string()).or_insert(0) += 1;
        counters.global += 1;

        if let Some(thread) = thread_id {
            counters
                .last_thread_post
                .insert((agent_id.to_string(), thread.to_string()), Utc::now());
        }
    }

    fn deny(&self, agent_id: &str, thread_id: Option<&str>, reason: &str) {
        tracing::debug!(agent = agent_id, reason, "Post denied by rate limiter");
        if let Some(bus) = &self.event_bus {
            let mut event = SwarmEvent::new(SwarmEventKind::RateLimitHit, agent_id)
                .with_data(serde_json::json!({ "reason": reason }));
            if let Some(thread) = thread_id {
                event = event.with_post(thread);
            }
            bus.publish(event);
        }
    }

    #[cfg(test)]
    fn force_date(&self, date: &str) {
        self.counters.lock().unwrap().date = date.to_string();
    }

    #[cfg(test)]
    fn backdate_thread(&self, agent_id: &str, thread_id: &str, seconds_ago: i64) {
        self.counters.lock().unwrap().last_thread_post.insert(
            (agent_id.to_string(), thread_id.to_string()),
            Utc::now() - ChronoDuration::seconds(seconds_ago),
        );
    }

    #[cfg(test)]
    fn cooldown_entries(&self) -> usize {
        self.counters.lock().unwrap().last_thread_post.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_agent: u32, global: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            per_agent_daily: per_agent,
            global_daily: global,
            thread_cooldown: Duration::from_secs(180),
        })
    }

    #[test]
    fn test_agent_daily_cap() {
        let limiter = limiter(3, 100);
        for _ in 0..3 {
            assert!(limiter.can_post("a", None, false));
            limiter.record_post("a", None);
        }
        assert!(!limiter.can_post("a", None, false));
        // A different agent is unaffected
        assert!(limiter.can_post("b", None, false));
    }

    #[test]
    fn test_global_daily_cap() {
        let limiter = limiter(10, 4);
        for i in 0..4 {
            let agent = format!("agent-{}", i);
            assert!(limiter.can_post(&agent, None, false));
            limiter.record_post(&agent, None);
        }
        // Every agent is now denied, even fresh ones
        assert!(!limiter.can_post("fresh", None, false));
    }

    #[test]
    fn test_day_rollover_resets_counters() {
        let limiter = limiter(1, 100);
        limiter.record_post("a", None);
        assert!(!limiter.can_post("a", None, false));

        limiter.force_date("2000-01-01");
        assert!(limiter.can_post("a", None, false));
    }

    #[test]
    fn test_thread_cooldown_denies_then_allows() {
        let limiter = limiter(10, 100);
        limiter.record_post("a", Some("thread-1"));

        // Within the window: denied for swarm posts, allowed if user-initiated
        assert!(!limiter.can_post("a", Some("thread-1"), false));
        assert!(limiter.can_post("a", Some("thread-1"), true));
        // Other threads are unaffected
        assert!(limiter.can_post("a", Some("thread-2"), false));

        // After the window elapses
        limiter.backdate_thread("a", "thread-1", 181);
        assert!(limiter.can_post("a", Some("thread-1"), false));
    }

    #[test]
    fn test_rollover_prunes_stale_cooldowns() {
        let limiter = limiter(10, 100);
        limiter.backdate_thread("a", "old", 7200);
        limiter.backdate_thread("a", "recent", 60);
        assert_eq!(limiter.cooldown_entries(), 2);

        limiter.force_date("2000-01-01");
        limiter.can_post("a", None, false);
        assert_eq!(limiter.cooldown_entries(), 1);
    }

    #[test]
    fn test_denial_emits_event() {
        let bus = Arc::new(EventBus::default());
        let limiter = RateLimiter::new(RateLimitConfig {
            per_agent_daily: 0,
            ..RateLimitConfig::default()
        })
        .with_event_bus(Arc::clone(&bus));

        assert!(!limiter.can_post("a", Some("thread-1"), false));
        let events = bus.replay_since(0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SwarmEventKind::RateLimitHit);
    }
}
