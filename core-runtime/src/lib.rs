//! # Core Runtime Module
//!
//! Foundational runtime pieces shared by the playback engine and its host:
//! - Logging and tracing infrastructure
//! - Configuration and bridge injection
//! - Event bus system

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
