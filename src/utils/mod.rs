//! The `utils` module holds the pieces every other module leans on:
//! the error taxonomy and logging initialization.

pub mod error;
pub mod logging;

pub use error::{GapError, HubError};
