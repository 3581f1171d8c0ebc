// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Handles environment-driven configuration and startup validation
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration module for the retell backend
//!
//! Everything is environment-driven: the server reads its settings once at
//! startup through [`environment::ServerConfig::from_env`] and passes the
//! resulting struct down by reference.

/// Environment and server configuration
pub mod environment;

pub use environment::{Environment, LogLevel, ServerConfig};
