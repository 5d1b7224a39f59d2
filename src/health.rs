#![forbid(unsafe_code)]

//! Per-endpoint health tracking with preference-ordered selection.
//!
//! Each chain owns an ordered list of REST endpoints. A single failed request
//! marks an endpoint `Down`, a single success marks it `Up`. When every
//! endpoint of a chain is down, the whole set moves to `Probation` and the
//! most recently failed endpoint is offered again, so a fully dark chain keeps
//! being retried instead of being abandoned.

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Up,
    Down,
    Probation,
}

impl EndpointStatus {
    pub fn is_up(self) -> bool {
        self == EndpointStatus::Up
    }
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub chain_id: String,
    pub endpoint: String,
    pub status: EndpointStatus,
    pub last_transition: u64,
}

#[derive(Debug, Error)]
#[error("chain {0} has no configured endpoints")]
pub struct UnknownChain(pub String);

#[derive(Debug)]
struct SlotState {
    status: EndpointStatus,
    last_transition: u64,
    // Last time any mark touched the slot; orders probation retries.
    last_marked: u64,
}

#[derive(Debug)]
struct Slot {
    url: String,
    state: Mutex<SlotState>,
}

/// Health state for every configured (chain, endpoint) pair. The key set is
/// fixed at construction; only the per-endpoint status behind each slot's own
/// lock ever changes, so chains never contend with each other.
#[derive(Debug)]
pub struct EndpointHealth {
    chains: HashMap<String, Vec<Slot>>,
}

impl EndpointHealth {
    pub fn new<I, E>(chains: I) -> Self
    where
        I: IntoIterator<Item = (String, E)>,
        E: IntoIterator<Item = String>,
    {
        let now = crate::unix_now_secs();
        let chains = chains
            .into_iter()
            .map(|(chain_id, endpoints)| {
                let slots = endpoints
                    .into_iter()
                    .map(|url| Slot {
                        url,
                        state: Mutex::new(SlotState {
                            status: EndpointStatus::Up,
                            last_transition: now,
                            last_marked: 0,
                        }),
                    })
                    .collect();
                (chain_id, slots)
            })
            .collect();
        Self { chains }
    }

    pub fn mark_success(&self, chain_id: &str, endpoint: &str) {
        self.mark(chain_id, endpoint, EndpointStatus::Up);
    }

    pub fn mark_failure(&self, chain_id: &str, endpoint: &str) {
        self.mark(chain_id, endpoint, EndpointStatus::Down);
    }

    fn mark(&self, chain_id: &str, endpoint: &str, status: EndpointStatus) {
        let Some(slots) = self.chains.get(chain_id) else {
            return;
        };
        let Some(slot) = slots.iter().find(|s| s.url == endpoint) else {
            return;
        };
        let now = crate::unix_now_secs();
        let mut state = slot.state.lock().unwrap();
        if state.status != status {
            match status {
                EndpointStatus::Up => {
                    info!(chain_id, endpoint, "rest endpoint recovered");
                }
                EndpointStatus::Down => {
                    warn!(chain_id, endpoint, "rest endpoint marked down");
                }
                EndpointStatus::Probation => {}
            }
            state.status = status;
            state.last_transition = now;
        }
        state.last_marked = now;
    }

    /// Pick the first endpoint (in configured preference order) currently up.
    /// When none are up, every endpoint moves to probation and the most
    /// recently failed one is returned, so selection never gives up on a
    /// configured chain.
    pub fn select(&self, chain_id: &str) -> Result<String, UnknownChain> {
        let slots = self
            .chains
            .get(chain_id)
            .filter(|slots| !slots.is_empty())
            .ok_or_else(|| UnknownChain(chain_id.to_string()))?;

        for slot in slots {
            if slot.state.lock().unwrap().status.is_up() {
                return Ok(slot.url.clone());
            }
        }

        let now = crate::unix_now_secs();
        let mut candidate: Option<(&Slot, u64)> = None;
        for slot in slots {
            let mut state = slot.state.lock().unwrap();
            if state.status != EndpointStatus::Probation {
                state.status = EndpointStatus::Probation;
                state.last_transition = now;
            }
            let marked = state.last_marked;
            if candidate.map_or(true, |(_, best)| marked >= best) {
                candidate = Some((slot, marked));
            }
        }
        let (slot, _) = candidate.expect("non-empty endpoint list");
        Ok(slot.url.clone())
    }

    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let mut out = Vec::new();
        for (chain_id, slots) in &self.chains {
            for slot in slots {
                let state = slot.state.lock().unwrap();
                out.push(HealthSnapshot {
                    chain_id: chain_id.clone(),
                    endpoint: slot.url.clone(),
                    status: state.status,
                    last_transition: state.last_transition,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> EndpointHealth {
        EndpointHealth::new([(
            "chain-1".to_string(),
            vec!["http://a".to_string(), "http://b".to_string()],
        )])
    }

    #[test]
    fn selects_first_endpoint_by_preference() {
        let health = tracker();
        assert_eq!(health.select("chain-1").unwrap(), "http://a");
    }

    #[test]
    fn fails_over_to_next_endpoint_after_failure() {
        let health = tracker();
        health.mark_failure("chain-1", "http://a");
        assert_eq!(health.select("chain-1").unwrap(), "http://b");
    }

    #[test]
    fn all_down_still_yields_a_candidate() {
        let health = tracker();
        health.mark_failure("chain-1", "http://a");
        health.mark_failure("chain-1", "http://b");
        // Both down: probation offers the most recently failed endpoint, and
        // keeps offering candidates on every subsequent call.
        let first = health.select("chain-1").unwrap();
        assert!(first == "http://a" || first == "http://b");
        assert!(health.select("chain-1").is_ok());

        // Probation reports as not-up until an actual success.
        assert!(health
            .snapshot()
            .iter()
            .all(|s| s.status == EndpointStatus::Probation));

        health.mark_success("chain-1", "http://a");
        assert_eq!(health.select("chain-1").unwrap(), "http://a");
    }

    #[test]
    fn success_recovers_a_down_endpoint() {
        let health = tracker();
        health.mark_failure("chain-1", "http://a");
        health.mark_success("chain-1", "http://a");
        assert_eq!(health.select("chain-1").unwrap(), "http://a");
    }

    #[test]
    fn unknown_chain_is_an_error() {
        let health = tracker();
        assert!(health.select("nope").is_err());
    }

    #[test]
    fn transitions_are_timestamped() {
        let health = tracker();
        health.mark_failure("chain-1", "http://a");
        let snap = health.snapshot();
        let a = snap.iter().find(|s| s.endpoint == "http://a").unwrap();
        assert_eq!(a.status, EndpointStatus::Down);
        assert!(a.last_transition > 0);
    }
}
