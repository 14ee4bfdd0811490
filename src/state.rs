use std::sync::Arc;

use crate::config::ServerConfig;
use crate::pool::QuestionPoolCache;
use crate::session::SessionManagerHandle;

#[derive(Clone)]
pub struct AppState {
    pub session_manager: SessionManagerHandle,
    pub pool: Arc<QuestionPoolCache>,
    pub server_config: Arc<ServerConfig>,
}
