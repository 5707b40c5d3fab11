// Application state for HTTP handlers
use crate::application::monitoring_service::MonitoringService;

#[derive(Clone)]
pub struct AppState {
    pub monitoring_service: MonitoringService,
}
