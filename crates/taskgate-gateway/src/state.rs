//! Process-wide application state shared across every handler.

use std::path::PathBuf;
use std::sync::Arc;

use taskgate_llm::PrimaryClient;
use taskgate_worker::health::ProxyHealthProbe;
use taskgate_worker::TaskService;

/// Bundles the [`TaskService`] facade with the collaborators the `/health`
/// and `/ready` handlers need directly.
#[derive(Clone)]
pub struct AppState {
    /// The task engine facade every route but health/ready delegates to.
    pub service: Arc<TaskService>,
    /// Artifacts directory, duplicated here (rather than reached through
    /// `service`) since the readiness probe is a gateway-level concern.
    pub artifacts_dir: PathBuf,
    /// Primary LM client, present only in `primary` mode; used solely for
    /// the readiness probe's `llm_proxy` check.
    pub llm_proxy: Option<Arc<dyn ProxyHealthProbe>>,
}

impl AppState {
    /// Build state from a constructed [`TaskService`] and the optional
    /// primary client the LM configuration produced.
    pub fn new(service: Arc<TaskService>, artifacts_dir: PathBuf, primary: Option<Arc<PrimaryClient>>) -> Self {
        let llm_proxy = primary.map(|p| p as Arc<dyn ProxyHealthProbe>);
        Self {
            service,
            artifacts_dir,
            llm_proxy,
        }
    }
}
