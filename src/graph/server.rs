use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::debug;
use parking_lot::Mutex;
use super::graph::Event;

const PUMP_TIMEOUT: Duration = Duration::from_millis(250);

/// Graph publication server: drains topology events and fans them out to
/// attached consumers. Serve and stop mirror the other subordinate
/// servers; the pump notices stop within one timeout.
pub struct Server {
    rx:      Mutex<Option<Receiver<Event>>>,
    clients: Mutex<Vec<Sender<Event>>>,
    stop:    AtomicBool,
}

impl Server {
    pub fn new(rx: Receiver<Event>) -> Self {
        Self {
            rx:      Mutex::new(Some(rx)),
            clients: Mutex::new(Vec::new()),
            stop:    AtomicBool::new(false),
        }
    }

    /// Attach a consumer; events arriving after this point are forwarded.
    pub fn attach(&self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.clients.lock().push(tx);
        rx
    }

    /// Blocks pumping events until stop. A second call returns
    /// immediately: the feed can be consumed only once.
    pub fn listen_and_serve(&self) {
        let rx = match self.rx.lock().take() {
            Some(rx) => rx,
            None     => return,
        };

        while !self.stop.load(Ordering::Acquire) {
            match rx.recv_timeout(PUMP_TIMEOUT) {
                Ok(event) => {
                    debug!("graph event: {:?}", event);
                    self.clients.lock().retain(|tx| tx.send(event.clone()).is_ok());
                },
                Err(RecvTimeoutError::Timeout)      => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("graph server finished");
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}
