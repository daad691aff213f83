//! # Tiquetes Common Library
//!
//! Shared code for the fruit-reception service:
//! - Database initialization, schema sync and migrations
//! - Row models and per-table queries
//! - Guide codes, consolidated guide view and guide status
//! - Bootstrap configuration loading
//! - Time helpers (UTC storage, Bogotá display)

pub mod config;
pub mod db;
pub mod error;
pub mod guia;
pub mod time;

pub use error::{Error, Result};
