//! Execution data model
//!
//! Request/result value types shared by every other module. Nothing here is
//! persisted; all values live for one `execute()` call.

pub mod limits;
pub mod request;
pub mod result;
pub mod status;
pub mod violation;

pub use limits::{ExecutionLimits, FileSystemAccess, LimitPolicy};
pub use request::{CodeExecutionRequest, TestCase};
pub use result::{outputs_match, CodeExecutionResult, ResourceUsage, TestResult};
pub use status::ExecutionStatus;
pub use violation::{SecurityViolation, Severity};
