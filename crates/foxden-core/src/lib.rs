//! Core types, config, errors, and endpoint handling for Foxden.

pub mod config;
pub mod endpoint;
pub mod error;
