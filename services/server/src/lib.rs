pub mod routes;

use parley_net::{Controller, Router, SessionManager};
use std::sync::Arc;

/// The assembled chat server: router, session registry and listener
/// supervisor.
pub struct App {
    pub router: Arc<Router>,
    pub sessions: Arc<SessionManager>,
    pub controller: Controller,
}

/// Build the application with all chat routes registered.
pub fn build() -> App {
    let router = Arc::new(Router::new());
    let sessions = Arc::new(SessionManager::new());
    routes::register(&router, &sessions);
    let controller = Controller::new(Arc::clone(&router), Arc::clone(&sessions));
    App {
        router,
        sessions,
        controller,
    }
}
