//! Shared types for the federation proxy workspace

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
