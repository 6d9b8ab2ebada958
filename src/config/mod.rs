// src/config/mod.rs

//! Coordinator configuration.
//!
//! - [`model`] is the TOML-backed data model.
//! - [`loader`] reads a config file from disk.
//! - [`validate`] turns a [`RawConfigFile`] into a checked [`ConfigFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    ChannelSection, ConfigFile, CoordinatorSection, NodeConfig, RawConfigFile,
};
