pub mod events;
pub mod probe;
pub mod service;
