//! storyloom library crate.
//!
//! Orchestrates the generation of personalized picture books, songs and
//! videos on top of slow external generative providers.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod pipeline;
pub mod providers;
pub mod storage;

pub use error::{Error, Result};
