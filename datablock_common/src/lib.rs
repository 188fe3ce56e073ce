//! Shared constants, configuration, and ambient conventions used across
//! the DataBlock workspace.
//!
//! This crate carries no IPC logic of its own. It is the ambient layer
//! every other crate in the workspace links against: a config-file
//! loader, a small set of cross-crate sizing constants, and the logging
//! level type that flows from configuration into `tracing`.
//!
//! # Module Structure
//!
//! - [`config`] — configuration loading traits and types
//! - [`consts`] — sizing constants shared by layout code
//! - [`prelude`] — common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! datablock_common = { path = "../datablock_common" }
//! ```
//!
//! ```rust
//! use datablock_common::config::{ConfigLoader, SharedConfig};
//! use datablock_common::consts::CACHE_LINE_SIZE;
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
