pub mod server;

pub use server::{routes, Server};
