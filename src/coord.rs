use std::process::{Child, Command, Stdio};
use anyhow::{Result, anyhow};
use log::{info, warn};
use parking_lot::Mutex;

/// Optional embedded coordination store, run as a child process. The
/// analyzer only manages its lifecycle; clients talk to it out of band.
pub struct EmbeddedStore {
    child: Mutex<Option<Child>>,
}

impl EmbeddedStore {
    pub fn spawn(cmd: &str) -> Result<Self> {
        let mut parts = cmd.split_whitespace();
        let bin = parts.next().ok_or_else(|| anyhow!("empty store command"))?;

        let child = Command::new(bin)
            .args(parts)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        info!("embedded store started (pid {})", child.id());

        Ok(Self { child: Mutex::new(Some(child)) })
    }

    /// Idempotent: the first call kills and reaps the child, later calls
    /// are no-ops.
    pub fn stop(&self) {
        if let Some(mut child) = self.child.lock().take() {
            if let Err(e) = child.kill() {
                warn!("failed to kill embedded store: {}", e);
            }
            let _ = child.wait();
            info!("embedded store stopped");
        }
    }
}

impl Drop for EmbeddedStore {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_and_stop() {
        let store = EmbeddedStore::spawn("sleep 30").unwrap();
        store.stop();
        store.stop();
    }

    #[test]
    fn spawn_failures_propagate() {
        assert!(EmbeddedStore::spawn("").is_err());
        assert!(EmbeddedStore::spawn("/nonexistent/coordination-store").is_err());
    }
}
