//! Contains pure functions for collecting nodes along each XPath axis.
//!
//! Every collector returns its nodes in proximity order: document order for forward
//! axes, reverse document order for reverse axes.

use crate::ast::Axis;
use crate::datasource::{DataSourceNode, NodeType};

/// Collects the nodes on `axis` from a single context node.
pub fn collect<'a, N: DataSourceNode<'a>>(axis: Axis, node: N) -> Vec<N> {
    match axis {
        Axis::Child => node.children().collect(),
        Axis::Attribute => node.attributes().collect(),
        Axis::Descendant => descendants(node),
        Axis::DescendantOrSelf => {
            let mut nodes = vec![node];
            nodes.extend(descendants(node));
            nodes
        }
        Axis::Parent => node.parent().into_iter().collect(),
        Axis::Ancestor => ancestors(node),
        Axis::AncestorOrSelf => {
            let mut nodes = vec![node];
            nodes.extend(ancestors(node));
            nodes
        }
        Axis::SelfAxis => vec![node],
        Axis::FollowingSibling => following_siblings(node),
        Axis::PrecedingSibling => preceding_siblings(node),
        Axis::Following => following(node),
        Axis::Preceding => preceding(node),
    }
}

/// Pre-order walk of the subtree below `node`, excluding attributes.
pub fn descendants<'a, N: DataSourceNode<'a>>(node: N) -> Vec<N> {
    let mut results = Vec::new();
    let mut stack: Vec<N> = node.children().collect();
    stack.reverse();
    while let Some(current) = stack.pop() {
        results.push(current);
        let mut children: Vec<N> = current.children().collect();
        children.reverse();
        stack.extend(children);
    }
    results
}

fn ancestors<'a, N: DataSourceNode<'a>>(node: N) -> Vec<N> {
    let mut results = Vec::new();
    let mut current = node.parent();
    while let Some(p) = current {
        results.push(p);
        current = p.parent();
    }
    results
}

fn is_attribute<'a, N: DataSourceNode<'a>>(node: N) -> bool {
    node.node_type() == NodeType::Attribute
}

fn following_siblings<'a, N: DataSourceNode<'a>>(node: N) -> Vec<N> {
    if is_attribute(node) {
        return vec![];
    }
    match node.parent() {
        Some(parent) => parent.children().skip_while(|s| *s != node).skip(1).collect(),
        None => vec![],
    }
}

fn preceding_siblings<'a, N: DataSourceNode<'a>>(node: N) -> Vec<N> {
    if is_attribute(node) {
        return vec![];
    }
    match node.parent() {
        Some(parent) => {
            let mut siblings: Vec<N> = parent.children().take_while(|s| *s != node).collect();
            siblings.reverse();
            siblings
        }
        None => vec![],
    }
}

fn following<'a, N: DataSourceNode<'a>>(node: N) -> Vec<N> {
    let mut results = Vec::new();
    let mut current = node;
    if is_attribute(node) {
        // The element's content follows its attributes.
        if let Some(owner) = node.parent() {
            results.extend(descendants(owner));
            current = owner;
        }
    }
    let mut next = Some(current);
    while let Some(c) = next {
        for sibling in following_siblings(c) {
            results.push(sibling);
            results.extend(descendants(sibling));
        }
        next = c.parent();
    }
    results
}

fn preceding<'a, N: DataSourceNode<'a>>(node: N) -> Vec<N> {
    let start = if is_attribute(node) {
        node.parent().unwrap_or(node)
    } else {
        node
    };
    let mut results = Vec::new();
    let mut next = Some(start);
    while let Some(c) = next {
        // preceding_siblings is nearest first; each subtree is reversed as a whole.
        for sibling in preceding_siblings(c) {
            let mut subtree = vec![sibling];
            subtree.extend(descendants(sibling));
            subtree.reverse();
            results.extend(subtree);
        }
        next = c.parent();
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::create_test_tree;

    #[test]
    fn test_collect_child() {
        let tree = create_test_tree();
        let n = |id| tree.node(id);
        assert_eq!(
            collect(Axis::Child, n(0)),
            vec![n(1), n(5), n(6), n(7), n(8)]
        );
        assert!(collect(Axis::Child, n(2)).is_empty());
    }

    #[test]
    fn test_collect_ancestor_nearest_first() {
        let tree = create_test_tree();
        let n = |id| tree.node(id);
        assert_eq!(collect(Axis::Ancestor, n(4)), vec![n(1), n(0)]);
        assert_eq!(collect(Axis::AncestorOrSelf, n(4)), vec![n(4), n(1), n(0)]);
        assert_eq!(collect(Axis::Ancestor, n(2)), vec![n(1), n(0)]);
    }

    #[test]
    fn test_collect_descendant_in_document_order() {
        let tree = create_test_tree();
        let n = |id| tree.node(id);
        assert_eq!(
            collect(Axis::Descendant, n(0)),
            vec![n(1), n(4), n(5), n(6), n(7), n(8), n(9)]
        );
        assert_eq!(collect(Axis::DescendantOrSelf, n(8)), vec![n(8), n(9)]);
    }

    #[test]
    fn test_collect_siblings() {
        let tree = create_test_tree();
        let n = |id| tree.node(id);
        assert_eq!(
            collect(Axis::FollowingSibling, n(1)),
            vec![n(5), n(6), n(7), n(8)]
        );
        assert_eq!(
            collect(Axis::PrecedingSibling, n(8)),
            vec![n(7), n(6), n(5), n(1)]
        );
        assert!(collect(Axis::FollowingSibling, n(2)).is_empty());
    }

    #[test]
    fn test_collect_following_preceding() {
        let tree = create_test_tree();
        let n = |id| tree.node(id);
        assert_eq!(
            collect(Axis::Following, n(4)),
            vec![n(5), n(6), n(7), n(8), n(9)]
        );
        assert_eq!(
            collect(Axis::Following, n(2)),
            vec![n(4), n(5), n(6), n(7), n(8), n(9)]
        );
        assert_eq!(
            collect(Axis::Preceding, n(6)),
            vec![n(5), n(4), n(1)]
        );
        // ancestors are not part of the preceding axis
        assert_eq!(collect(Axis::Preceding, n(9)), vec![n(7), n(6), n(5), n(4), n(1)]);
    }
}
