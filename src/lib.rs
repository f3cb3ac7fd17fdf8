//! ePub → PDF conversion service — async job tracking around an external converter.

pub mod api;
pub mod config;
pub mod converter;
pub mod error;
pub mod tasks;

#[cfg(all(test, unix))]
pub(crate) mod testing;
