use log::debug;
use crate::flow::Flow;

/// One enrichment stage: annotates a flow in place with whatever context
/// it knows about.
pub trait FlowEnhancer: Send + Sync {
    fn name(&self) -> &'static str;
    fn enhance(&self, flow: &mut Flow);
}

/// Runs each enhancer over a batch in place. Enhancers see flows after
/// the table merge, so cumulative counters are already in place.
pub struct MappingPipeline {
    enhancers: Vec<Box<dyn FlowEnhancer>>,
}

impl MappingPipeline {
    pub fn new(enhancers: Vec<Box<dyn FlowEnhancer>>) -> Self {
        for e in &enhancers {
            debug!("enhancer {} registered", e.name());
        }
        Self { enhancers }
    }

    pub fn enhance(&self, flows: &mut [Flow]) {
        for flow in flows.iter_mut() {
            for enhancer in &self.enhancers {
                enhancer.enhance(flow);
            }
        }
    }
}
