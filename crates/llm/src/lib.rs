//! Model-backend plumbing for gaia: the provider trait, reply normalization,
//! an HTTP provider for OpenAI-compatible and Anthropic endpoints, and
//! scripted mocks for tests.

pub mod http;
pub mod provider;
pub mod reply;
