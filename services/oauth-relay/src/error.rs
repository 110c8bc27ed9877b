//! Service-specific error types

use driver::FlowError;
use thiserror::Error;

/// Flow state carrier failures.
///
/// None of these reach a caller as-is: `From<Error> for FlowError` maps
/// them onto the flow error taxonomy.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to seal flow state: {0}")]
    Seal(String),

    #[error("flow state cookie could not be opened")]
    Open,

    #[error("flow state expired")]
    Expired,

    #[error("flow state too large: {len} bytes (max {max})")]
    Oversized { len: usize, max: usize },
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for FlowError {
    fn from(err: Error) -> Self {
        match err {
            Error::Seal(detail) => FlowError::internal(detail),
            Error::Open | Error::Expired => {
                FlowError::missing_state("flow state is missing, expired or already used")
            }
            Error::Oversized { .. } => FlowError::invalid_input(err.to_string()),
        }
    }
}
