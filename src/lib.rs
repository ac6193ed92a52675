pub mod alert;
pub mod analyzer;
pub mod args;
pub mod config;
pub mod coord;
pub mod flow;
pub mod graph;
pub mod mappings;
pub mod storage;
pub mod topology;
