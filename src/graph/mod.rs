pub mod graph;
pub mod server;

pub use graph::{backend_from_config, Backend, Event, Graph, MemBackend, Node};
pub use server::Server;
