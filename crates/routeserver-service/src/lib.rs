#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod events;
pub mod progress;
pub mod routing_data;
pub mod services;
pub mod store;
pub mod tasks;
pub mod types;
pub mod utils;
