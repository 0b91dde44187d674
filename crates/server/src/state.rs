//! Application state
//!
//! Process-wide services constructed once at startup and shared read-only
//! with every call session.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;

use switchboard_agent::ThreadBinder;
use switchboard_config::Settings;
use switchboard_core::{AgentRuntime, CallControl};
use switchboard_pipeline::PipelineEngines;
use switchboard_telephony::RecoveryHandler;

use crate::session::SessionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Settings>>,
    pub engines: PipelineEngines,
    pub runtime: Arc<dyn AgentRuntime>,
    pub call_control: Arc<dyn CallControl>,
    pub binder: Arc<ThreadBinder>,
    pub recovery: Arc<RecoveryHandler>,
    pub sessions: Arc<SessionManager>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Settings,
        engines: PipelineEngines,
        runtime: Arc<dyn AgentRuntime>,
        call_control: Arc<dyn CallControl>,
        binder: Arc<ThreadBinder>,
        recovery: Arc<RecoveryHandler>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let max_sessions = config.server.max_sessions;
        Self {
            config: Arc::new(RwLock::new(config)),
            engines,
            runtime,
            call_control,
            binder,
            recovery,
            sessions: Arc::new(SessionManager::new(max_sessions)),
            metrics,
        }
    }
}
