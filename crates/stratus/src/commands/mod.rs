pub mod config;
pub mod provision;
