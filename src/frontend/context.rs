use std::sync::Arc;

use crate::engine::auth::manager::AuthManager;
use crate::engine::context::EngineContext;

/// What every client connection shares: the engine instance it talks to
/// and the authentication manager.
pub struct FrontendContext {
    pub engine: Arc<EngineContext>,
    pub auth: AuthManager,
}

impl FrontendContext {
    pub fn new(engine: Arc<EngineContext>) -> Self {
        Self {
            engine,
            auth: AuthManager::from_config(),
        }
    }
}
