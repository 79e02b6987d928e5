pub mod api;
pub mod file;
pub mod peer;
pub mod rating;
pub mod reputation;
pub mod transfer;
