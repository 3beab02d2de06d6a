use std::sync::Arc;
use std::time::Instant;

use crate::chain::ChainClient;
use crate::intake::IntakeService;
use crate::store::ClaimStore;

#[derive(Clone)]
pub struct AppState {
    pub intake: IntakeService,
    pub store: Arc<dyn ClaimStore>,
    pub chain: Arc<dyn ChainClient>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn ClaimStore>, chain: Arc<dyn ChainClient>) -> Self {
        Self {
            intake: IntakeService::new(Arc::clone(&store)),
            store,
            chain,
            start_time: Instant::now(),
        }
    }
}
