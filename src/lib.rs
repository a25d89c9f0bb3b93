pub mod config;
pub mod device;
pub mod dynamics;
pub mod fleet;
pub mod generator;
pub mod infra;
pub mod messages;
pub mod output;
pub mod services;
