#![forbid(unsafe_code)]

pub mod anthropic;
pub mod app;
pub mod audio;
pub mod cli;
pub mod config;
pub mod generate;
pub mod image;
pub mod logging;
pub mod text;
