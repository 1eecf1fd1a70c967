//! Domain value objects shared by the supervisors and the finalizer.

pub mod retry_policy;
pub mod source;

pub use retry_policy::RetryPolicy;
pub use source::{AuthMethod, Source};
