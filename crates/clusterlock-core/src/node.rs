//! Cluster node identity
//!
//! Every row written by a node carries its id in `lockOwner`. Ids must be
//! unique among the nodes sharing a lock table, and stable for the lifetime
//! of the process.

/// Supplies the identity of the current cluster node
pub trait NodeIdProvider: Send + Sync {
    fn node_id(&self) -> String;
}

/// A fixed, externally configured node id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticNodeId(String);

impl StaticNodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl NodeIdProvider for StaticNodeId {
    fn node_id(&self) -> String {
        self.0.clone()
    }
}

/// `<hostname>-<pid>`, unique per process on a host
#[derive(Debug, Clone, Copy, Default)]
pub struct HostnameNodeId;

impl NodeIdProvider for HostnameNodeId {
    fn node_id(&self) -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        format!("{}-{}", host, std::process::id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_node_id() {
        assert_eq!(StaticNodeId::new("node-a").node_id(), "node-a");
    }

    #[test]
    fn test_hostname_node_id_includes_pid() {
        let id = HostnameNodeId.node_id();
        assert!(id.ends_with(&format!("-{}", std::process::id())));
        assert_eq!(id, HostnameNodeId.node_id());
    }
}
