pub mod bot;
pub mod config;
pub mod core;
pub mod error;
pub mod exchange;
pub mod models;
#[cfg(test)]
pub mod test_helpers;
pub mod trading;
