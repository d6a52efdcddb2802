//! Shared types

pub mod error;

pub use error::{ReclaimError, Result};
