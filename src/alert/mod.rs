pub mod manager;
pub mod server;

pub use manager::{Alert, AlertManager, Rule};
pub use server::{routes, Server};
