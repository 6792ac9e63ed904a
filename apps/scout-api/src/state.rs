use std::sync::Arc;

use scout_service::ScoutService;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<ScoutService>,
}
impl AppState {
	pub fn new(config: scout_config::Config) -> Self {
		Self::from_service(ScoutService::new(config))
	}

	pub fn from_service(service: ScoutService) -> Self {
		Self { service: Arc::new(service) }
	}
}
