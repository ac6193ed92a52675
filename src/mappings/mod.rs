pub mod graph;
pub mod pipeline;

pub use graph::GraphFlowEnhancer;
pub use pipeline::{FlowEnhancer, MappingPipeline};
