//! Static public host → internal node table.

use std::collections::HashMap;

use crate::config::NodeConfig;

/// One database node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub public_host: String,
    pub internal_host: String,
}

impl ClusterNode {
    /// Both hosts lose one trailing slash.
    pub fn new(public_host: &str, internal_host: &str) -> Self {
        Self {
            public_host: trim_slash(public_host).to_string(),
            internal_host: trim_slash(internal_host).to_string(),
        }
    }
}

fn trim_slash(host: &str) -> &str {
    host.strip_suffix('/').unwrap_or(host)
}

/// Nodes in configured (failover) order, indexed by public host.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    nodes: Vec<ClusterNode>,
    by_host: HashMap<String, usize>,
}

impl NodeTable {
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        let by_host = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.public_host.to_ascii_lowercase(), i))
            .collect();
        Self { nodes, by_host }
    }

    pub fn from_config(nodes: &[NodeConfig]) -> Self {
        Self::new(
            nodes
                .iter()
                .map(|n| ClusterNode::new(&n.public_host, &n.internal_host))
                .collect(),
        )
    }

    /// Node behind a `Host` value; the port is part of the key.
    pub fn resolve(&self, host: &str) -> Option<&ClusterNode> {
        self.by_host
            .get(&host.to_ascii_lowercase())
            .map(|&i| &self.nodes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NodeTable {
        NodeTable::new(vec![
            ClusterNode::new("a.esdb.local/", "10.0.0.1:2113/"),
            ClusterNode::new("b.esdb.local:8443", "10.0.0.2:2113"),
        ])
    }

    #[test]
    fn trims_one_trailing_slash() {
        let node = ClusterNode::new("a//", "b/");
        assert_eq!(node.public_host, "a/");
        assert_eq!(node.internal_host, "b");
    }

    #[test]
    fn resolves_case_insensitively() {
        let table = table();
        assert_eq!(
            table.resolve("A.ESDB.local").map(|n| n.internal_host.as_str()),
            Some("10.0.0.1:2113")
        );
        assert!(table.resolve("b.esdb.local:8443").is_some());
        assert!(table.resolve("b.esdb.local").is_none());
        assert!(table.resolve("c.esdb.local").is_none());
    }

    #[test]
    fn keeps_configured_order() {
        let hosts: Vec<_> = table().iter().map(|n| n.public_host.clone()).collect();
        assert_eq!(hosts, vec!["a.esdb.local", "b.esdb.local:8443"]);
    }
}
