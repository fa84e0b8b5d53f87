//! Per-node circuit breaker for Mesh dispatch (SPEC_FULL supplement).
//!
//! One breaker instance covers every candidate node; each node gets its own
//! independent Closed/Open/Half-Open state machine, the same three-state
//! model as the teacher's single-service `resilience::CircuitBreaker`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct NodeState {
    state: RwLock<State>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_millis: AtomicU64,
}

impl NodeState {
    fn new() -> Self {
        Self {
            state: RwLock::new(State::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_millis: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    nodes: DashMap<String, NodeState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, nodes: DashMap::new() }
    }

    fn node(&self, name: &str) -> dashmap::mapref::one::Ref<'_, String, NodeState> {
        if !self.nodes.contains_key(name) {
            self.nodes.entry(name.to_string()).or_insert_with(NodeState::new);
        }
        self.nodes.get(name).unwrap()
    }

    /// May the caller attempt dispatch to `node` right now?
    pub fn allow(&self, node: &str) -> bool {
        let entry = self.node(node);
        self.maybe_recover(&entry);
        *entry.state.read() != State::Open
    }

    pub fn record_success(&self, node: &str) {
        let entry = self.node(node);
        let mut state = entry.state.write();
        match *state {
            State::Closed => entry.failure_count.store(0, Ordering::SeqCst),
            State::HalfOpen => {
                let successes = entry.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    *state = State::Closed;
                    entry.failure_count.store(0, Ordering::SeqCst);
                    entry.success_count.store(0, Ordering::SeqCst);
                }
            }
            State::Open => entry.failure_count.store(0, Ordering::SeqCst),
        }
    }

    pub fn record_failure(&self, node: &str) {
        let entry = self.node(node);
        entry.last_failure_millis.store(now_millis(), Ordering::SeqCst);
        let mut state = entry.state.write();
        match *state {
            State::Closed => {
                let failures = entry.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    *state = State::Open;
                }
            }
            State::HalfOpen => {
                *state = State::Open;
                entry.success_count.store(0, Ordering::SeqCst);
            }
            State::Open => {
                entry.failure_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn maybe_recover(&self, entry: &NodeState) {
        let mut state = entry.state.write();
        if *state != State::Open {
            return;
        }
        let last_failure = entry.last_failure_millis.load(Ordering::SeqCst);
        let elapsed = Duration::from_millis(now_millis().saturating_sub(last_failure));
        if elapsed >= self.config.recovery_timeout {
            *state = State::HalfOpen;
            entry.success_count.store(0, Ordering::SeqCst);
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
