pub mod api;
pub mod commands;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod plex;
pub mod settings;
pub mod sync;
pub mod timeline;

#[cfg(test)]
mod testing;
