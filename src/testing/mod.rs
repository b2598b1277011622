//! Test impact resolution and execution

mod backend;
mod mapping;
mod result;
mod runner;

pub use backend::TestBackend;
pub use mapping::{MappingError, TestImpactMapper};
pub use result::TestResult;
pub use runner::{TestExecutor, TestRunner};

use serde::Serializer;
use std::time::Duration;

/// Serialize a duration as fractional seconds
pub fn serialize_secs<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
