//! Octree storage cell: eight optional children plus a log-odds value.

const NO_CHILD: Option<Box<OctreeNode>> = None;

/// A single octree node.
///
/// A node is a leaf while it has no children; the child array is only
/// allocated on first use. Children are exclusively owned, so dropping a
/// node releases its whole subtree.
#[derive(Debug, Clone)]
pub struct OctreeNode {
    children: Option<Box<[Option<Box<OctreeNode>>; 8]>>,
    log_odds: f32,
}

impl OctreeNode {
    /// Create a leaf at the neutral prior (log-odds 0).
    #[inline]
    pub fn new() -> Self {
        Self {
            children: None,
            log_odds: 0.0,
        }
    }

    /// Current log-odds value.
    #[inline]
    pub fn log_odds(&self) -> f32 {
        self.log_odds
    }

    /// Overwrite the log-odds value.
    #[inline]
    pub fn set_log_odds(&mut self, value: f32) {
        self.log_odds = value;
    }

    /// Whether child slot `i` is occupied.
    #[inline]
    pub fn child_exists(&self, i: usize) -> bool {
        self.children
            .as_deref()
            .map_or(false, |c| c[i].is_some())
    }

    /// Read-only access to child `i`.
    #[inline]
    pub fn child(&self, i: usize) -> Option<&OctreeNode> {
        self.children.as_deref().and_then(|c| c[i].as_deref())
    }

    /// Mutable access to child `i`.
    #[inline]
    pub fn child_mut(&mut self, i: usize) -> Option<&mut OctreeNode> {
        self.children.as_deref_mut().and_then(|c| c[i].as_deref_mut())
    }

    /// Create child `i` and return it. The slot must be empty.
    pub fn create_child(&mut self, i: usize) -> &mut OctreeNode {
        debug_assert!(!self.child_exists(i), "child {i} already exists");
        self.child_entry(i)
    }

    /// Child `i`, created at the neutral prior if absent.
    pub(crate) fn child_entry(&mut self, i: usize) -> &mut OctreeNode {
        let children = self
            .children
            .get_or_insert_with(|| Box::new([NO_CHILD; 8]));
        children[i].get_or_insert_with(|| Box::new(OctreeNode::new()))
    }

    /// Delete child `i` and all its descendants.
    pub fn delete_child(&mut self, i: usize) {
        if let Some(children) = self.children.as_deref_mut() {
            children[i] = None;
            if children.iter().all(Option::is_none) {
                self.children = None;
            }
        }
    }

    /// Whether any child exists.
    #[inline]
    pub fn has_children(&self) -> bool {
        self.children
            .as_deref()
            .map_or(false, |c| c.iter().any(Option::is_some))
    }

    /// Whether this node is a leaf.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        !self.has_children()
    }

    /// Materialize all eight children, each inheriting this node's value.
    ///
    /// Called on pruned leaves before a descendant is modified, so the
    /// seven untouched octants keep the collapsed value.
    pub fn expand(&mut self) {
        debug_assert!(self.is_leaf(), "expand called on an inner node");
        let value = self.log_odds;
        for i in 0..8 {
            self.child_entry(i).set_log_odds(value);
        }
    }

    /// Collapse eight equal-valued leaf children into this node.
    ///
    /// Succeeds only when all eight children exist, are leaves, and store
    /// bit-identical log-odds; the parent then adopts the shared value and
    /// the children are released. Returns whether pruning happened.
    pub fn prune(&mut self) -> bool {
        let Some(children) = self.children.as_deref() else {
            return false;
        };
        let Some(first) = children[0].as_deref() else {
            return false;
        };
        if !first.is_leaf() {
            return false;
        }
        // Compare the stored representation exactly; a tolerance would
        // make pruning depend on update order.
        let bits = first.log_odds.to_bits();
        for child in &children[1..] {
            match child.as_deref() {
                Some(c) if c.is_leaf() && c.log_odds.to_bits() == bits => {}
                _ => return false,
            }
        }
        self.log_odds = f32::from_bits(bits);
        self.children = None;
        true
    }

    /// Maximum log-odds over the existing children.
    ///
    /// Only meaningful on inner nodes.
    #[inline]
    pub fn max_child_log_odds(&self) -> f32 {
        let mut max = f32::NEG_INFINITY;
        if let Some(children) = self.children.as_deref() {
            for child in children.iter().flatten() {
                max = max.max(child.log_odds);
            }
        }
        max
    }
}

impl Default for OctreeNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_neutral_leaf() {
        let node = OctreeNode::new();
        assert!(node.is_leaf());
        assert!(!node.has_children());
        assert_eq!(node.log_odds(), 0.0);
    }

    #[test]
    fn test_create_and_delete_child() {
        let mut node = OctreeNode::new();
        node.create_child(3).set_log_odds(1.5);

        assert!(node.child_exists(3));
        assert!(!node.child_exists(0));
        assert!(node.has_children());
        assert_eq!(node.child(3).unwrap().log_odds(), 1.5);

        node.delete_child(3);
        assert!(!node.child_exists(3));
        assert!(node.is_leaf());
    }

    #[test]
    fn test_delete_child_releases_descendants() {
        let mut node = OctreeNode::new();
        node.create_child(0).create_child(5).set_log_odds(2.0);
        node.delete_child(0);
        assert!(node.is_leaf());
    }

    #[test]
    fn test_prune_requires_all_eight_children() {
        let mut node = OctreeNode::new();
        for i in 0..7 {
            node.create_child(i).set_log_odds(1.0);
        }
        assert!(!node.prune());

        node.create_child(7).set_log_odds(1.0);
        assert!(node.prune());
        assert!(node.is_leaf());
        assert_eq!(node.log_odds(), 1.0);
    }

    #[test]
    fn test_prune_requires_equal_values() {
        let mut node = OctreeNode::new();
        for i in 0..8 {
            node.create_child(i).set_log_odds(1.0);
        }
        node.child_mut(4).unwrap().set_log_odds(1.0000001);
        assert!(!node.prune());
    }

    #[test]
    fn test_prune_rejects_inner_children() {
        let mut node = OctreeNode::new();
        for i in 0..8 {
            node.create_child(i).set_log_odds(1.0);
        }
        node.child_mut(2).unwrap().create_child(0).set_log_odds(1.0);
        assert!(!node.prune());
    }

    #[test]
    fn test_expand_copies_value_to_children() {
        let mut node = OctreeNode::new();
        node.set_log_odds(-0.5);
        node.expand();

        assert!(node.has_children());
        for i in 0..8 {
            assert_eq!(node.child(i).unwrap().log_odds(), -0.5);
        }
    }

    #[test]
    fn test_expand_then_prune_is_identity() {
        let mut node = OctreeNode::new();
        node.set_log_odds(0.75);
        node.expand();
        assert!(node.prune());
        assert!(node.is_leaf());
        assert_eq!(node.log_odds(), 0.75);
    }

    #[test]
    fn test_max_child_log_odds() {
        let mut node = OctreeNode::new();
        node.create_child(0).set_log_odds(-1.0);
        node.create_child(1).set_log_odds(2.5);
        node.create_child(2).set_log_odds(0.5);
        assert_eq!(node.max_child_log_odds(), 2.5);
    }
}
