pub mod rpc;
pub mod server;

pub use rpc::RpcState;
pub use server::Server;

#[cfg(test)]
mod test;
