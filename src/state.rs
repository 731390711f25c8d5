// src/state.rs

//! Per-node build state ledger
//!
//! States only move forward: `Unresolved -> Queued -> Prepared -> Built ->
//! Installed`. `Failed` can be entered from any state except `Installed`
//! and is terminal. Skipping ahead (a repository package goes straight
//! from `Queued` to `Installed`) is allowed; going back is not.

use crate::error::{Error, Result};
use crate::graph::LayerSequence;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildState {
    Unresolved,
    Queued,
    Prepared,
    Built,
    Installed,
    Failed,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildState::Installed | BuildState::Failed)
    }

    /// Whether moving from `self` to `next` is permitted
    pub fn can_advance_to(self, next: BuildState) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (BuildState::Failed, _) | (BuildState::Installed, _) => false,
            (_, BuildState::Failed) => true,
            _ => next > self,
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildState::Unresolved => "unresolved",
            BuildState::Queued => "queued",
            BuildState::Prepared => "prepared",
            BuildState::Built => "built",
            BuildState::Installed => "installed",
            BuildState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Thread-safe map of node name to [`BuildState`]
#[derive(Debug, Default)]
pub struct StateLedger {
    states: Mutex<HashMap<String, BuildState>>,
}

impl StateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger with every node of `layers` queued
    pub fn from_layers(layers: &LayerSequence) -> Self {
        let states = layers
            .nodes()
            .map(|n| (n.name().to_string(), BuildState::Queued))
            .collect();
        Self {
            states: Mutex::new(states),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, BuildState>>> {
        self.states
            .lock()
            .map_err(|_| Error::Internal("state ledger lock poisoned".to_string()))
    }

    /// Current state; unknown nodes are `Unresolved`
    pub fn get(&self, name: &str) -> BuildState {
        self.lock()
            .ok()
            .and_then(|s| s.get(name).copied())
            .unwrap_or(BuildState::Unresolved)
    }

    /// Move `name` forward to `next`
    pub fn advance(&self, name: &str, next: BuildState) -> Result<()> {
        let mut states = self.lock()?;
        let current = states.get(name).copied().unwrap_or(BuildState::Unresolved);
        if !current.can_advance_to(next) {
            return Err(Error::Internal(format!(
                "{} cannot move from {} to {}",
                name, current, next
            )));
        }
        if current != next {
            debug!("{}: {} -> {}", name, current, next);
            states.insert(name.to_string(), next);
        }
        Ok(())
    }

    /// Mark `name` failed unless it is already installed
    pub fn fail(&self, name: &str) {
        if let Ok(mut states) = self.lock() {
            let current = states.get(name).copied().unwrap_or(BuildState::Unresolved);
            if current != BuildState::Installed {
                states.insert(name.to_string(), BuildState::Failed);
            }
        }
    }

    /// Sorted names currently in `state`
    pub fn in_state(&self, state: BuildState) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .map(|s| {
                s.iter()
                    .filter(|(_, st)| **st == state)
                    .map(|(n, _)| n.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn snapshot(&self) -> BTreeMap<String, BuildState> {
        self.lock()
            .map(|s| s.iter().map(|(n, st)| (n.clone(), *st)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        let ledger = StateLedger::new();
        ledger.advance("foo", BuildState::Queued).unwrap();
        ledger.advance("foo", BuildState::Prepared).unwrap();
        ledger.advance("foo", BuildState::Prepared).unwrap();
        ledger.advance("foo", BuildState::Built).unwrap();

        assert!(matches!(
            ledger.advance("foo", BuildState::Queued),
            Err(Error::Internal(_))
        ));
        assert_eq!(ledger.get("foo"), BuildState::Built);
    }

    #[test]
    fn test_skip_ahead_allowed() {
        let ledger = StateLedger::new();
        ledger.advance("bar", BuildState::Queued).unwrap();
        ledger.advance("bar", BuildState::Installed).unwrap();
        assert_eq!(ledger.get("bar"), BuildState::Installed);
    }

    #[test]
    fn test_failed_is_terminal() {
        let ledger = StateLedger::new();
        ledger.advance("baz", BuildState::Queued).unwrap();
        ledger.fail("baz");
        assert_eq!(ledger.get("baz"), BuildState::Failed);
        assert!(ledger.advance("baz", BuildState::Built).is_err());
        assert!(ledger.advance("baz", BuildState::Failed).is_ok());
    }

    #[test]
    fn test_installed_never_fails() {
        let ledger = StateLedger::new();
        ledger.advance("qux", BuildState::Installed).unwrap();
        ledger.fail("qux");
        assert_eq!(ledger.get("qux"), BuildState::Installed);
        assert!(!BuildState::Installed.can_advance_to(BuildState::Failed));
    }

    #[test]
    fn test_in_state_sorted() {
        let ledger = StateLedger::new();
        for name in ["zeta", "alpha", "mid"] {
            ledger.advance(name, BuildState::Queued).unwrap();
        }
        ledger.advance("mid", BuildState::Prepared).unwrap();
        assert_eq!(ledger.in_state(BuildState::Queued), vec!["alpha", "zeta"]);
        assert_eq!(ledger.snapshot().len(), 3);
    }

    #[test]
    fn test_unknown_is_unresolved() {
        assert_eq!(StateLedger::new().get("ghost"), BuildState::Unresolved);
    }
}
