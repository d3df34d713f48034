//! # Skylog Common Library
//!
//! Shared code for the Skylog form services including:
//! - Error and result types
//! - Configuration resolution (CLI > ENV > TOML > defaults)
//! - Form event types and the EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
