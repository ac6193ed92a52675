pub mod memory;
pub mod storage;

pub use memory::MemStorage;
pub use storage::{Filters, Storage};
