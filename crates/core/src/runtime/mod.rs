mod idle;
mod shutdown;

pub use idle::{review_cycle, spawn_idle_loop};
pub use shutdown::ShutdownGuard;
