use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use crate::flow::unix_now;
use crate::graph::Event;

const EVAL_TIMEOUT: Duration = Duration::from_millis(250);

/// Alert rule: fires when a newly-added topology node's name matches the
/// expression.
pub struct Rule {
    pub name: String,
    pub expr: Regex,
}

#[derive(Clone, Debug, Serialize)]
pub struct Alert {
    pub rule: String,
    pub node: String,
    pub ts:   u64,
}

/// Evaluates registered rules against topology events on a background
/// thread. Start and stop are idempotent.
pub struct AlertManager {
    rules: Arc<Mutex<Vec<Rule>>>,
    rx:    Mutex<Option<Receiver<Event>>>,
    tx:    Sender<Alert>,
    out:   Mutex<Option<Receiver<Alert>>>,
    stop:  Arc<AtomicBool>,
    task:  Mutex<Option<JoinHandle<()>>>,
}

impl AlertManager {
    pub fn new(rx: Receiver<Event>) -> Self {
        let (tx, out) = unbounded();
        Self {
            rules: Arc::new(Mutex::new(Vec::new())),
            rx:    Mutex::new(Some(rx)),
            tx:    tx,
            out:   Mutex::new(Some(out)),
            stop:  Arc::new(AtomicBool::new(false)),
            task:  Mutex::new(None),
        }
    }

    pub fn register(&self, rule: Rule) {
        info!("alert rule {} registered", rule.name);
        self.rules.lock().push(rule);
    }

    /// Alert feed for the alert server. Single consumer.
    pub fn alerts(&self) -> Option<Receiver<Alert>> {
        self.out.lock().take()
    }

    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let rx = match self.rx.lock().take() {
            Some(rx) => rx,
            None     => return,
        };

        let rules = self.rules.clone();
        let tx    = self.tx.clone();
        let stop  = self.stop.clone();

        *task = Some(thread::spawn(move || evaluate(rx, rules, tx, stop)));
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(task) = self.task.lock().take() {
            let _ = task.join();
        }
    }
}

fn evaluate(rx: Receiver<Event>, rules: Arc<Mutex<Vec<Rule>>>, tx: Sender<Alert>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let node = match rx.recv_timeout(EVAL_TIMEOUT) {
            Ok(Event::NodeAdded(node))          => node,
            Ok(_)                               => continue,
            Err(RecvTimeoutError::Timeout)      => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        for rule in rules.lock().iter() {
            if rule.expr.is_match(&node.name) {
                debug!("rule {} matched node {}", rule.name, node.name);
                let _ = tx.send(Alert {
                    rule: rule.name.clone(),
                    node: node.name.clone(),
                    ts:   unix_now(),
                });
            }
        }
    }

    debug!("alert manager finished");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use super::*;
    use crate::graph::Node;

    fn node(name: &str) -> Node {
        Node {
            id:       name.to_string(),
            name:     name.to_string(),
            addrs:    Vec::new(),
            macs:     Vec::new(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn rule_fires_on_matching_node() {
        let (tx, rx) = unbounded();
        let manager  = AlertManager::new(rx);
        let alerts   = manager.alerts().unwrap();

        manager.register(Rule {
            name: "edge-hosts".to_string(),
            expr: Regex::new("^edge-").unwrap(),
        });
        manager.start();

        tx.send(Event::NodeAdded(node("edge-42"))).unwrap();
        tx.send(Event::NodeAdded(node("core-1"))).unwrap();

        let alert = alerts.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(alert.rule, "edge-hosts");
        assert_eq!(alert.node, "edge-42");

        manager.stop();
        assert!(alerts.try_recv().is_err());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (_tx, rx) = unbounded();
        let manager   = AlertManager::new(rx);

        manager.start();
        manager.start();
        manager.stop();
        manager.stop();
    }
}
