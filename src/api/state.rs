use std::sync::Arc;

use crate::config::Config;
use crate::service::JobService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: JobService,
}

impl AppState {
    pub fn new(config: Config, service: JobService) -> Self {
        Self {
            config: Arc::new(config),
            service,
        }
    }
}
