use std::sync::Arc;
use std::time::Duration;

use crate::forwarder::Forwarder;
use crate::rate_limit::RateGate;

// app's shared state
pub struct AppState {
    pub gate: Arc<RateGate>,
    pub forwarder: Forwarder,
    pub session_max_age: Duration, // session cookie lives as long as one rate window
}

impl AppState {
    pub fn new(gate: Arc<RateGate>, forwarder: Forwarder) -> Self {
        let session_max_age = gate.window();
        Self {
            gate,
            forwarder,
            session_max_age,
        }
    }
}
