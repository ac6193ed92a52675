use std::collections::HashMap;
use anyhow::Result;
use crate::flow::Flow;

/// Opaque query filters built from request query-string pairs, one value
/// per key.
pub type Filters = HashMap<String, String>;

/// Durable store for flows that have left the live table.
pub trait Storage: Send + Sync {
    /// Persist a batch of expired flows. Failures are the backend's to
    /// report; the caller never retries.
    fn store_flows(&self, flows: &[Flow]) -> Result<()>;

    /// Search stored flows. An Err here surfaces to HTTP callers as a
    /// plain 404.
    fn search_flows(&self, filters: &Filters) -> Result<Vec<Flow>>;
}
