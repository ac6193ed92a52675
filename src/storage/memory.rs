use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use crate::flow::Flow;
use super::{Filters, Storage};

/// In-memory flow store. With `strict` set, a search matching nothing is
/// reported as a failure instead of an empty result, which callers map to
/// a 404.
pub struct MemStorage {
    flows:  Mutex<Vec<Flow>>,
    strict: bool,
}

impl MemStorage {
    pub fn new() -> Self {
        Self { flows: Mutex::new(Vec::new()), strict: false }
    }

    pub fn strict() -> Self {
        Self { flows: Mutex::new(Vec::new()), strict: true }
    }

    pub fn len(&self) -> usize {
        self.flows.lock().len()
    }
}

impl Storage for MemStorage {
    fn store_flows(&self, flows: &[Flow]) -> Result<()> {
        self.flows.lock().extend_from_slice(flows);
        Ok(())
    }

    fn search_flows(&self, filters: &Filters) -> Result<Vec<Flow>> {
        let flows: Vec<Flow> = self.flows.lock().iter()
            .filter(|flow| matches(flow, filters))
            .cloned()
            .collect();

        if self.strict && flows.is_empty() {
            return Err(anyhow!("no flows match"));
        }

        Ok(flows)
    }
}

fn matches(flow: &Flow, filters: &Filters) -> bool {
    filters.iter().all(|(key, value)| match key.as_str() {
        "protocol" => flow.protocol.to_string().eq_ignore_ascii_case(value),
        "src"      => flow.src.to_string() == *value || flow.src.addr.to_string() == *value,
        "dst"      => flow.dst.to_string() == *value || flow.dst.addr.to_string() == *value,
        "src_node" => flow.src_node.as_deref() == Some(value.as_str()),
        "dst_node" => flow.dst_node.as_deref() == Some(value.as_str()),
        _          => false,
    })
}
