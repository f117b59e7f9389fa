pub mod pool;

pub use pool::{ModelLease, ModelPool, ModelStatus};
