use std::sync::Arc;

use crate::canvas::CanvasClient;
use crate::services::audit::AuditLog;

#[derive(Clone)]
pub struct AppState {
    pub canvas: Arc<dyn CanvasClient>,
    pub audit: Arc<AuditLog>,
}
