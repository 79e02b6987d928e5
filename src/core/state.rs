// Application state (AppState)

use crate::core::config::Config;
use crate::library::node::Node;
use crate::metrics::collector::Metrics;
use std::sync::Arc;

/// Shared application state
///
/// Handlers reach every component through the node.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,

    /// Request counters, shared with the node
    pub metrics: Arc<Metrics>,

    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, node: Arc<Node>) -> Self {
        let metrics = Arc::clone(node.metrics());

        Self {
            node,
            metrics,
            config: Arc::new(config),
        }
    }

    pub fn from_config(config: Config) -> Self {
        let node = Arc::new(Node::new(&config));
        Self::new(config, node)
    }
}
