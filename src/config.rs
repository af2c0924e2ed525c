//! Immutable driver configuration.
//!
//! [`DriverConfig`] is constructed once at startup and handed to
//! [`Driver::new`](crate::driver::Driver::new); lifecycle logic never
//! consults ambient or global state.

use std::time::Duration;

use crate::types::NodeId;

/// Default retention window for completed operation tokens.
const DEFAULT_TOKEN_RETENTION: Duration = Duration::from_secs(60);

/// Configuration for a [`Driver`](crate::driver::Driver) instance.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Driver name reported to callers, domain-name notation.
    pub name: String,
    /// Driver version string reported to callers.
    pub version: String,
    /// Identity of the node this driver instance serves.
    pub node_id: NodeId,
    /// How long completed operation tokens are retained to answer retries.
    pub token_retention: Duration,
}

impl DriverConfig {
    /// Build a configuration for the given node with default name, version,
    /// and token retention.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            name: "rs.blockcsi.driver".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            node_id: node_id.into(),
            token_retention: DEFAULT_TOKEN_RETENTION,
        }
    }

    /// Override the reported driver name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the reported driver version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Override the completed-token retention window.
    pub fn with_token_retention(mut self, retention: Duration) -> Self {
        self.token_retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = DriverConfig::new("node-1");
        assert_eq!(cfg.node_id, NodeId("node-1".into()));
        assert_eq!(cfg.name, "rs.blockcsi.driver");
        assert_eq!(cfg.token_retention, DEFAULT_TOKEN_RETENTION);
    }

    #[test]
    fn overrides() {
        let cfg = DriverConfig::new("node-1")
            .with_name("rs.blockcsi.test")
            .with_version("test-version")
            .with_token_retention(Duration::from_millis(50));
        assert_eq!(cfg.name, "rs.blockcsi.test");
        assert_eq!(cfg.version, "test-version");
        assert_eq!(cfg.token_retention, Duration::from_millis(50));
    }
}
