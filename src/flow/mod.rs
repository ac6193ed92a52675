pub mod decode;
pub mod flow;
pub mod table;

pub use decode::decode;
pub use flow::{Addr, Direction, Ethernet, Flow, Key, Layer, Metric, Protocol};
pub use table::{ConversationDoc, DiscoveryDoc, FlowTable};

use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_now() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d)  => d.as_secs(),
        Err(_) => 0,
    }
}
