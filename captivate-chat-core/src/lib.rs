//! Core types for captivate-chat
//!
//! This crate provides the configuration, logging, error and wire protocol
//! types shared by the client library and the command-line host.

pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod utils;

pub use error::{Error, Result};
