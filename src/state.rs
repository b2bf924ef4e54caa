use std::sync::Arc;

use crate::{auth::TokenManager, service::Service};

#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    pub token_manager: Arc<TokenManager>,
}
