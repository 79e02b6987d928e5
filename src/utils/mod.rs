pub mod auth;
pub mod hashing;
pub mod time;
