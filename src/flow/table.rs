use std::collections::HashMap;
use std::time::{Duration, Instant};
use crossbeam_channel::{tick, Receiver};
use parking_lot::Mutex;
use serde::Serialize;
use super::flow::{Flow, Key, Layer, Metric};

pub type ExpireCallback = Box<dyn Fn(Vec<Flow>) + Send + Sync>;

struct Registration {
    callback: ExpireCallback,
    window:   Duration,
}

/// Live working set of currently-active flows, shared by the ingestion
/// loop (writer), the expiration loop (remover) and the query handlers
/// (readers). Each operation is atomic under the table lock; callers get
/// no ordering guarantees between concurrent updates and expiries.
pub struct FlowTable {
    flows:    Mutex<HashMap<Key, Flow>>,
    registry: Mutex<Option<Registration>>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self {
            flows:    Mutex::new(HashMap::new()),
            registry: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.flows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.lock().is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<Flow> {
        self.flows.lock().get(key).cloned()
    }

    /// Merge a batch into the live set. Each element of the batch is
    /// replaced by the cumulative post-merge state so that downstream
    /// enrichment sees current counters, not the raw sample.
    pub fn update(&self, flows: &mut [Flow]) {
        let mut live = self.flows.lock();
        for flow in flows.iter_mut() {
            let entry = live.entry(flow.key())
                .and_modify(|entry| entry.merge(flow))
                .or_insert_with(|| flow.clone());
            *flow = entry.clone();
        }
    }

    /// Write enrichment annotations back to the live entries. Only the
    /// topology fields are copied; counters are never overwritten.
    pub fn annotate(&self, flows: &[Flow]) {
        let mut live = self.flows.lock();
        for flow in flows {
            if let Some(entry) = live.get_mut(&flow.key()) {
                if flow.src_node.is_some() {
                    entry.src_node = flow.src_node.clone();
                }
                if flow.dst_node.is_some() {
                    entry.dst_node = flow.dst_node.clone();
                }
            }
        }
    }

    /// Register the expiration callback and window. A single registration
    /// is supported; registering again replaces the previous one.
    pub fn register_expire(&self, callback: ExpireCallback, window: Duration) {
        *self.registry.lock() = Some(Registration { callback, window });
    }

    /// Ticker driving the expiration loop. Ticks at the registered window,
    /// or every minute when nothing is registered.
    pub fn expire_ticker(&self) -> Receiver<Instant> {
        let window = self.registry.lock().as_ref()
            .map(|r| r.window)
            .unwrap_or_else(|| Duration::from_secs(60));
        tick(window.max(Duration::from_millis(100)))
    }

    /// Remove every entry idle for at least the registered window and
    /// deliver the removed set to the callback exactly once.
    pub fn expire(&self, now: u64) {
        let registry = self.registry.lock();
        let window = match registry.as_ref() {
            Some(r) => r.window.as_secs(),
            None    => return,
        };

        let mut live = self.flows.lock();
        let keys: Vec<Key> = live.iter()
            .filter(|(_, flow)| now.saturating_sub(flow.ts) >= window)
            .map(|(key, _)| *key)
            .collect();

        let expired: Vec<Flow> = keys.iter()
            .filter_map(|key| live.remove(key))
            .collect();
        drop(live);

        if let (Some(r), false) = (registry.as_ref(), expired.is_empty()) {
            (r.callback)(expired);
        }
    }

    /// Force-expire the entire live set, bypassing the window. Test
    /// harnesses only.
    pub fn expire_now(&self) {
        let registry = self.registry.lock();

        let mut live = self.flows.lock();
        let expired: Vec<Flow> = live.drain().map(|(_, flow)| flow).collect();
        drop(live);

        if let (Some(r), false) = (registry.as_ref(), expired.is_empty()) {
            (r.callback)(expired);
        }
    }

    /// Drop the expiration registration and all live entries. Flows still
    /// in the table are lost, not delivered.
    pub fn unregister_all(&self) {
        *self.registry.lock() = None;
        self.flows.lock().clear();
    }

    /// Per-endpoint-pair traffic at the given layer, for the conversation
    /// view. Well-formed (empty nodes/links) when the table is empty.
    pub fn conversation(&self, layer: Layer) -> ConversationDoc {
        let live = self.flows.lock();

        let mut doc   = ConversationDoc::default();
        let mut index = HashMap::new();
        let mut links = HashMap::new();

        for flow in live.values() {
            let (src, dst) = match flow.endpoints(layer) {
                Some(pair) => pair,
                None       => continue,
            };
            let s = intern(&mut doc.nodes, &mut index, src);
            let d = intern(&mut doc.nodes, &mut index, dst);
            *links.entry((s, d)).or_insert(0) += flow.bytes;
        }

        doc.links = links.into_iter().map(|((source, target), value)| {
            ConversationLink { source, target, value }
        }).collect();
        doc.links.sort_by_key(|l| (l.source, l.target));

        doc
    }

    /// Per-protocol traffic totals, for the discovery view.
    pub fn discovery(&self, metric: Metric) -> DiscoveryDoc {
        let live = self.flows.lock();

        let mut totals = HashMap::new();
        for flow in live.values() {
            let count = match metric {
                Metric::Bytes   => flow.bytes,
                Metric::Packets => flow.packets,
            };
            *totals.entry(flow.protocol).or_insert(0) += count;
        }

        let mut children: Vec<DiscoveryEntry> = totals.into_iter().map(|(protocol, size)| {
            DiscoveryEntry { name: protocol.to_string(), size }
        }).collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));

        DiscoveryDoc {
            name:     "traffic".to_string(),
            children: children,
        }
    }
}

fn intern(nodes: &mut Vec<ConversationNode>, index: &mut HashMap<String, usize>, name: String) -> usize {
    if let Some(&i) = index.get(&name) {
        return i;
    }
    let i = nodes.len();
    nodes.push(ConversationNode { name: name.clone(), group: 0 });
    index.insert(name, i);
    i
}

#[derive(Debug, Default, Serialize)]
pub struct ConversationDoc {
    pub nodes: Vec<ConversationNode>,
    pub links: Vec<ConversationLink>,
}

#[derive(Debug, Serialize)]
pub struct ConversationNode {
    pub name:  String,
    pub group: u32,
}

#[derive(Debug, Serialize)]
pub struct ConversationLink {
    pub source: usize,
    pub target: usize,
    pub value:  u64,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryDoc {
    pub name:     String,
    pub children: Vec<DiscoveryEntry>,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryEntry {
    pub name: String,
    pub size: u64,
}
