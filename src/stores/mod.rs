pub mod content_index;
pub mod local_store;
pub mod peer_registry;
pub mod rating_store;
