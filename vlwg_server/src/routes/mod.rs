//! Route handlers for the gateway.

pub mod gateway;
pub mod management;

use std::sync::Arc;

use crate::config::Config;
use crate::dialer::OutboundDialer;
use crate::identity::IdentityStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub identity: Arc<IdentityStore>,
    pub dialer: Arc<OutboundDialer>,
}

impl AppState {
    pub fn new(config: Config, identity: IdentityStore, dialer: OutboundDialer) -> Self {
        Self {
            config: Arc::new(config),
            identity: Arc::new(identity),
            dialer: Arc::new(dialer),
        }
    }
}
