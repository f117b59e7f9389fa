mod orchestrator;

pub use orchestrator::{AgentCore, DISPATCH_UNAVAILABLE, GOODBYE, HELP_TEXT, STREAM_FAILED};
