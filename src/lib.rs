#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod data;
pub mod engine;
pub mod feed;
pub mod media;
pub mod model;
pub mod overlay;
pub mod playback;
pub mod poller;
pub mod rest;
pub mod source;
pub mod storage;
pub mod window;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
pub use engine::Engine;
