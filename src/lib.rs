pub mod core;
pub mod discovery;
pub mod handlers;
pub mod library;
pub mod metrics;
pub mod models;
pub mod protocol;
pub mod reputation;
pub mod stores;
pub mod throttling;
pub mod transfer;
pub mod utils;
