//! Core types, collaborator traits, and the error hierarchy shared by all
//! Trellis crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Result, TrellisError};
