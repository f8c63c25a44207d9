//! The dependency set arena.

use std::collections::HashMap;

use kiln_common::Guid;

use crate::node::{DependencyNode, NodeIndex};

/// Arena of dependency nodes discovered by one walk.
///
/// Nodes are appended in discovery order and never removed; an index map
/// guarantees at most one node per output guid.
#[derive(Default)]
pub struct DependencySet {
    nodes: Vec<DependencyNode>,
    index: HashMap<Guid, NodeIndex>,
}

impl DependencySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node and returns its index.
    ///
    /// Panics if a node for the same output guid was already added; callers
    /// must check [`index_of`](Self::index_of) first.
    pub fn add(&mut self, node: DependencyNode) -> NodeIndex {
        let guid = node.output_guid;
        assert!(
            !self.index.contains_key(&guid),
            "duplicate dependency node for {guid}"
        );
        let idx = NodeIndex::from_raw(self.nodes.len() as u32);
        self.nodes.push(node);
        self.index.insert(guid, idx);
        idx
    }

    /// Returns the index of the node producing `output_guid`, if any.
    pub fn index_of(&self, output_guid: Guid) -> Option<NodeIndex> {
        self.index.get(&output_guid).copied()
    }

    /// Returns the node at `idx`.
    pub fn get(&self, idx: NodeIndex) -> &DependencyNode {
        &self.nodes[idx.as_usize()]
    }

    /// Returns the node at `idx` mutably.
    pub fn get_mut(&mut self, idx: NodeIndex) -> &mut DependencyNode {
        &mut self.nodes[idx.as_usize()]
    }

    /// Number of nodes in the set.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the set holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates nodes in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &DependencyNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeIndex::from_raw(i as u32), n))
    }

    /// Iterates all node indices in discovery order.
    pub fn indices(&self) -> impl DoubleEndedIterator<Item = NodeIndex> {
        (0..self.nodes.len() as u32).map(NodeIndex::from_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enumset::EnumSet;
    use kiln_common::NodeFlag;

    fn node(guid: u128) -> DependencyNode {
        DependencyNode::new(
            Guid::from_u128(guid),
            "tests.Pipeline",
            1,
            format!("out/{guid}"),
            EnumSet::from(NodeFlag::Build),
        )
    }

    #[test]
    fn add_and_lookup() {
        let mut set = DependencySet::new();
        let a = set.add(node(1));
        let b = set.add(node(2));

        assert_ne!(a, b);
        assert_eq!(set.len(), 2);
        assert_eq!(set.index_of(Guid::from_u128(1)), Some(a));
        assert_eq!(set.index_of(Guid::from_u128(3)), None);
        assert_eq!(set.get(b).output_path, "out/2");
    }

    #[test]
    fn children_link_by_index() {
        let mut set = DependencySet::new();
        let parent = set.add(node(1));
        let child = set.add(node(2));
        set.get_mut(parent).children.insert(child);

        assert!(set.get(parent).children.contains(&child));
        assert!(set.get(child).children.is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate dependency node")]
    fn duplicate_guid_panics() {
        let mut set = DependencySet::new();
        set.add(node(1));
        set.add(node(1));
    }

    #[test]
    fn iteration_preserves_discovery_order() {
        let mut set = DependencySet::new();
        for i in 1..=4 {
            set.add(node(i));
        }
        let order: Vec<u32> = set.iter().map(|(i, _)| i.as_raw()).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
