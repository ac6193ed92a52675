use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::debug;
use parking_lot::Mutex;
use super::manager::Alert;

const PUMP_TIMEOUT: Duration = Duration::from_millis(250);
const RETAINED: usize = 1000;

/// Alert delivery server: pumps alerts from the manager into a bounded
/// recent-alert buffer served over HTTP.
pub struct Server {
    rx:     Mutex<Option<Receiver<Alert>>>,
    recent: Mutex<Vec<Alert>>,
    stop:   AtomicBool,
}

impl Server {
    pub fn new(rx: Receiver<Alert>) -> Self {
        Self {
            rx:     Mutex::new(Some(rx)),
            recent: Mutex::new(Vec::new()),
            stop:   AtomicBool::new(false),
        }
    }

    pub fn recent(&self) -> Vec<Alert> {
        self.recent.lock().clone()
    }

    /// Blocks delivering alerts until stop.
    pub fn listen_and_serve(&self) {
        let rx = match self.rx.lock().take() {
            Some(rx) => rx,
            None     => return,
        };

        while !self.stop.load(Ordering::Acquire) {
            match rx.recv_timeout(PUMP_TIMEOUT) {
                Ok(alert) => {
                    debug!("alert {} on {}", alert.rule, alert.node);
                    let mut recent = self.recent.lock();
                    if recent.len() >= RETAINED {
                        recent.remove(0);
                    }
                    recent.push(alert);
                },
                Err(RecvTimeoutError::Timeout)      => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("alert server finished");
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

pub fn routes(server: Arc<Server>) -> Router {
    Router::new()
        .route("/alerts", get(alerts))
        .with_state(server)
}

async fn alerts(State(server): State<Arc<Server>>) -> Json<Vec<Alert>> {
    Json(server.recent())
}
