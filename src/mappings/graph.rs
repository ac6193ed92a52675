use std::sync::Arc;
use crate::flow::Flow;
use crate::graph::Graph;
use super::pipeline::FlowEnhancer;

/// Annotates flow endpoints with the topology node their IP belongs to.
pub struct GraphFlowEnhancer {
    graph: Arc<Graph>,
}

impl GraphFlowEnhancer {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }
}

impl FlowEnhancer for GraphFlowEnhancer {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn enhance(&self, flow: &mut Flow) {
        if flow.src_node.is_none() {
            flow.src_node = self.graph.lookup_ip(flow.src.addr).map(|n| n.id);
        }
        if flow.dst_node.is_none() {
            flow.dst_node = self.graph.lookup_ip(flow.dst.addr).map(|n| n.id);
        }
    }
}
