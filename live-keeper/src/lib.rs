//! live-keeper library crate.
//!
//! Supervises yt-dlp captures of live channels and moves finished recordings
//! from per-channel scratch directories into their destinations.

pub mod capture;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod finalizer;
pub mod logging;
pub mod panic_hook;
pub mod process;
pub mod supervisor;
pub mod utils;

pub use error::{Error, Result};
