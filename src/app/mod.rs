pub mod config;
pub mod device;
pub mod error;
pub mod hdc;
pub mod logging;
pub mod models;
pub mod pmap;
pub mod session;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;
