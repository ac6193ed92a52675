use anyhow::{Result, anyhow};
use super::flow::Flow;

/// Decode one probe datagram into a flow record. The wire format is a
/// single JSON-encoded record per datagram, at most 4096 bytes.
pub fn decode(data: &[u8]) -> Result<Flow> {
    if data.is_empty() {
        return Err(anyhow!("empty datagram"));
    }
    Ok(serde_json::from_slice(data)?)
}
