use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use anyhow::{Result, anyhow};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use pnet::util::MacAddr;
use serde::{Serialize, Deserialize};

/// One topology node: a host, interface or other endpoint the enrichment
/// pipeline can attach flows to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id:       String,
    pub name:     String,
    pub addrs:    Vec<IpAddr>,
    pub macs:     Vec<MacAddr>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug)]
pub enum Event {
    NodeAdded(Node),
    NodeDeleted(String),
}

/// Storage behind the topology graph.
pub trait Backend: Send + Sync {
    fn put(&self, node: Node);
    fn get(&self, id: &str) -> Option<Node>;
    fn delete(&self, id: &str) -> Option<Node>;
    fn nodes(&self) -> Vec<Node>;
}

pub struct MemBackend {
    nodes: Mutex<HashMap<String, Node>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self { nodes: Mutex::new(HashMap::new()) }
    }
}

impl Backend for MemBackend {
    fn put(&self, node: Node) {
        self.nodes.lock().insert(node.id.clone(), node);
    }

    fn get(&self, id: &str) -> Option<Node> {
        self.nodes.lock().get(id).cloned()
    }

    fn delete(&self, id: &str) -> Option<Node> {
        self.nodes.lock().remove(id)
    }

    fn nodes(&self) -> Vec<Node> {
        self.nodes.lock().values().cloned().collect()
    }
}

pub fn backend_from_config(name: &str) -> Result<Arc<dyn Backend>> {
    match name {
        "memory" => Ok(Arc::new(MemBackend::new())),
        other    => Err(anyhow!("unknown graph backend: {}", other)),
    }
}

/// The topology graph: node registry plus event fan-out to subscribers
/// (graph server, alert manager).
pub struct Graph {
    backend: Arc<dyn Backend>,
    subs:    Mutex<Vec<Sender<Event>>>,
}

impl Graph {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend: backend,
            subs:    Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.subs.lock().push(tx);
        rx
    }

    pub fn add_node(&self, node: Node) {
        self.backend.put(node.clone());
        self.publish(Event::NodeAdded(node));
    }

    pub fn del_node(&self, id: &str) {
        if self.backend.delete(id).is_some() {
            self.publish(Event::NodeDeleted(id.to_string()));
        }
    }

    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.backend.get(id)
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.backend.nodes()
    }

    pub fn lookup_ip(&self, ip: IpAddr) -> Option<Node> {
        self.backend.nodes().into_iter().find(|n| n.addrs.contains(&ip))
    }

    pub fn lookup_mac(&self, mac: MacAddr) -> Option<Node> {
        self.backend.nodes().into_iter().find(|n| n.macs.contains(&mac))
    }

    fn publish(&self, event: Event) {
        self.subs.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, ip: &str) -> Node {
        Node {
            id:       id.to_string(),
            name:     format!("host-{}", id),
            addrs:    vec![ip.parse().unwrap()],
            macs:     Vec::new(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn lookup_by_ip() {
        let graph = Graph::new(Arc::new(MemBackend::new()));
        graph.add_node(node("n1", "10.0.0.1"));
        graph.add_node(node("n2", "10.0.0.2"));

        let hit = graph.lookup_ip("10.0.0.2".parse().unwrap()).unwrap();
        assert_eq!(hit.id, "n2");
        assert!(graph.lookup_ip("10.0.0.9".parse().unwrap()).is_none());
    }

    #[test]
    fn subscribers_see_events() {
        let graph = Graph::new(Arc::new(MemBackend::new()));
        let rx = graph.subscribe();

        graph.add_node(node("n1", "10.0.0.1"));
        graph.del_node("n1");
        graph.del_node("n1"); // second delete publishes nothing

        match rx.try_recv().unwrap() {
            Event::NodeAdded(n) => assert_eq!(n.id, "n1"),
            other               => panic!("unexpected event: {:?}", other),
        }
        match rx.try_recv().unwrap() {
            Event::NodeDeleted(id) => assert_eq!(id, "n1"),
            other                  => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_backend_is_an_error() {
        assert!(backend_from_config("memory").is_ok());
        assert!(backend_from_config("gremlin").is_err());
    }
}
