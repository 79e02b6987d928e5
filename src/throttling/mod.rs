pub mod manager;
pub mod throttler;
