//! Node-level operations composed from the components

pub mod node;
