//! Result type aliases for Apiary.

use crate::ApiaryError;

/// A specialized `Result` type for Apiary operations.
pub type ApiaryResult<T> = Result<T, ApiaryError>;
