//! Custom heuristic probes and their registry
//!
//! Signature sets reference probes by identifier; the registry resolves
//! those identifiers and reports any it does not know.

mod session_isolation;
mod timing;

pub use session_isolation::{SessionIsolationProbe, SESSION_ISOLATION};
pub use timing::{schedule_matches, TimingSideChannelProbe, TIMING_SIDE_CHANNEL};

use std::collections::HashMap;
use std::sync::Arc;

use honeysift_common::{ConfigError, EngineConfig, HeuristicProbe, ProbeResult, SignatureSet};

use crate::communicator::SshConnector;

#[derive(Default, Clone)]
pub struct ProbeRegistry {
    probes: HashMap<String, Arc<dyn HeuristicProbe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in probes configured from `config`.
    pub fn with_defaults(config: &EngineConfig) -> ProbeResult<Self> {
        let connector = SshConnector::new(&config.communicator);
        let mut registry = Self::new();
        registry.register(Arc::new(SessionIsolationProbe::new(
            Arc::new(connector),
            config.session_isolation.clone(),
        )));
        registry.register(Arc::new(TimingSideChannelProbe::new(config.timing.clone())?));
        Ok(registry)
    }

    /// Add or replace a probe under its own identifier.
    pub fn register(&mut self, probe: Arc<dyn HeuristicProbe>) {
        self.probes.insert(probe.id().to_string(), probe);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn HeuristicProbe>> {
        self.probes.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.probes.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.probes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Every probe reference in `sets` that has no registered probe or
    /// names a probe that cannot run against the set's protocol.
    pub fn validate(&self, sets: &[SignatureSet]) -> Vec<ConfigError> {
        sets.iter()
            .flat_map(|set| {
                set.custom_probes.iter().filter_map(move |id| match self.probes.get(id) {
                    None => Some(ConfigError::UnknownProbe {
                        honeypot: set.name.clone(),
                        probe: id.clone(),
                    }),
                    Some(probe) if !probe.supports(set.protocol) => {
                        Some(ConfigError::ProbeProtocolMismatch {
                            honeypot: set.name.clone(),
                            probe: id.clone(),
                            protocol: set.protocol.as_str(),
                        })
                    }
                    Some(_) => None,
                })
            })
            .collect()
    }
}
