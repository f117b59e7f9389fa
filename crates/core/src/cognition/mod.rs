pub mod dispatch;
pub mod intent;
pub mod prompt;
pub mod reflection;
pub mod routing;
pub mod safety;
pub mod thought_seed;
