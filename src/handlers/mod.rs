pub mod fallback;
pub mod files;
pub mod health;
pub mod metrics;
pub mod peers;
pub mod ratings;
pub mod reputation;
pub mod stats;
