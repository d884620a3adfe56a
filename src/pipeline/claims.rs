//! In-flight code reservations
//!
//! A code is claimed before its lookup starts and released once it has been
//! recorded (or given up on). Claiming checks the seen-set and the in-flight
//! set under one lock, so two sightings of a new code can never both start
//! a lookup.

use parking_lot::Mutex;
use std::collections::HashSet;

/// Set of codes currently being resolved
#[derive(Debug, Default)]
pub struct CodeClaims {
    in_flight: Mutex<HashSet<String>>,
}

impl CodeClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `code` unless it is in flight or `is_recorded` reports it seen
    pub fn claim<F>(&self, code: &str, is_recorded: F) -> Option<Claim<'_>>
    where
        F: FnOnce(&str) -> bool,
    {
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains(code) || is_recorded(code) {
            return None;
        }
        in_flight.insert(code.to_string());

        Some(Claim {
            owner: self,
            code: code.to_string(),
        })
    }

    /// Whether `code` is being resolved right now
    #[cfg(test)]
    pub fn is_claimed(&self, code: &str) -> bool {
        self.in_flight.lock().contains(code)
    }

    /// True when no code is in flight
    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}

/// Reservation of one code, released on drop
#[derive(Debug)]
pub struct Claim<'a> {
    owner: &'a CodeClaims,
    code: String,
}

impl Claim<'_> {
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.owner.in_flight.lock().remove(&self.code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let claims = CodeClaims::new();

        let first = claims.claim("96385074", |_| false).unwrap();
        assert_eq!(first.code(), "96385074");
        assert!(claims.is_claimed("96385074"));
        assert!(claims.claim("96385074", |_| false).is_none());

        drop(first);
        assert!(claims.is_idle());
        assert!(claims.claim("96385074", |_| false).is_some());
    }

    #[test]
    fn test_recorded_codes_cannot_be_claimed() {
        let claims = CodeClaims::new();
        assert!(claims.claim("96385074", |c| c == "96385074").is_none());
        assert!(claims.is_idle());
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let claims = Arc::new(CodeClaims::new());
        let start = Arc::new(Barrier::new(8));
        let attempted = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let claims = Arc::clone(&claims);
                let start = Arc::clone(&start);
                let attempted = Arc::clone(&attempted);
                std::thread::spawn(move || {
                    start.wait();
                    let claim = claims.claim("4006381333931", |_| false);
                    // Every thread tries before any claim is released
                    attempted.wait();
                    claim.is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(claims.is_idle());
    }
}
