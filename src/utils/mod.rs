pub mod error;
pub mod retry;

pub use error::{AppError, ErrorKind, StageFailure, StageResult};
pub use retry::RetryPolicy;
