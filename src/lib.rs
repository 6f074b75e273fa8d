#![warn(clippy::unused_async)]

pub mod analyze;
pub mod backend;
pub mod completions;
pub mod config;
pub mod data;
pub mod index;
pub mod model;
pub mod navigate;
pub mod scan;
pub mod server;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
