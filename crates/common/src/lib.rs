//! Common types shared by the OAuth relay crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
