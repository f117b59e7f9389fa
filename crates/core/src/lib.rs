//! gaia core: the cognitive turn pipeline around a small pool of local models.

pub mod agent;
pub mod capability;
pub mod cognition;
pub mod config;
pub mod dialogue;
pub mod io;
pub mod memory;
pub mod models;
pub mod runtime;
pub mod types;

pub use agent::AgentCore;
pub use config::GaiaCfg;
pub use models::ModelPool;
