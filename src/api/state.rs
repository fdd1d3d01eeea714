use std::sync::Arc;

use crate::gateway::TriggerGateway;
use crate::status::StatusReporter;
use crate::task::TaskRunner;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<TriggerGateway>,
    pub status: Arc<StatusReporter>,
}

impl AppState {
    /// Wire the gateway and status reporter around a shared runner.
    pub fn new(runner: Arc<TaskRunner>, secret: Option<String>) -> Self {
        let status = Arc::new(StatusReporter::new(runner.store().clone()));
        Self {
            gateway: Arc::new(TriggerGateway::new(runner, secret)),
            status,
        }
    }
}
