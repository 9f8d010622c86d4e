//! `specdaemon-core`: the task daemon, spec factory, validator pipeline,
//! and MCTS orchestrator described in spec.md. No module here owns a
//! singleton; every component is constructed once by the CLI and threaded
//! through explicitly via [`DaemonContext`] (spec.md §9 Design Notes:
//! "global mutable state ... must become an explicit context value").

pub mod config;
pub mod error;
pub mod executor;
pub mod mcts;
pub mod model;
pub mod planfile;
pub mod scheduler;
pub mod spec_factory;
pub mod state;
pub mod status;
pub mod validator;
pub mod watcher;

use std::sync::Arc;

use crate::config::DaemonConfig;
use crate::executor::registry::AgentRegistry;
use crate::scheduler::DaemonCore;
use crate::state::StateStore;
use crate::status::StatusPublisher;

/// The one piece of shared, constructed-once state every worker (scheduler
/// loop, stuck checker, watcher callback, MCTS orchestrator, CLI) is handed
/// an `Arc` to, in place of the module-level singletons / global caches the
/// original system used (spec.md §9 Design Notes).
pub struct DaemonContext {
    pub config: Arc<DaemonConfig>,
    pub state: Arc<StateStore>,
    pub registry: Arc<AgentRegistry>,
    pub status: Arc<StatusPublisher>,
    pub core: Arc<DaemonCore>,
}

impl DaemonContext {
    /// Build a context from a resolved config, loading (or creating) the
    /// durable state store and status publisher at their configured paths.
    pub fn build(config: DaemonConfig, registry: AgentRegistry) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let state = Arc::new(StateStore::load(config.daemon_state_path())?);
        let registry = Arc::new(registry);
        let status = Arc::new(StatusPublisher::new(config.status_file.clone()));
        let core = DaemonCore::new(
            Arc::clone(&config),
            Arc::clone(&state),
            Arc::clone(&registry),
            Arc::clone(&status),
        );
        Ok(DaemonContext {
            config,
            state,
            registry,
            status,
            core,
        })
    }
}
