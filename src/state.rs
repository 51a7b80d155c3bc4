//! Shared application state for all routes. Built once at boot.

use crate::access::AccessManager;
use crate::dispatch::Dispatcher;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub access: Arc<AccessManager>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, access: AccessManager) -> Self {
        AppState {
            dispatcher: Arc::new(dispatcher),
            access: Arc::new(access),
        }
    }
}
