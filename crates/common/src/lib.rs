//! Common types shared by the workspace pool crates

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
