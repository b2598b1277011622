//! Configuration types and loading for code-surgeon

mod loader;
mod testing;

pub use loader::SurgeonConfig;
pub use testing::{BackendCommand, TestingConfig};
