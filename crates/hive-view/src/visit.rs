//! Visitor traversal over a [`TreeView`].
//!
//! Both traversals are iterative. [`TreeView::visit`] is pre-order with
//! early exit through [`TreeVisitor::accept`]; [`TreeView::visit_dfs`] is
//! post-order and visits everything.

use crate::element::{ElementView, NodeId, TreeView, ViewKind};

/// Callbacks invoked per element kind. Every method defaults to a no-op.
pub trait TreeVisitor {
    /// Called for a tree or manifest reference after its kind callback.
    /// Returning `false` skips its children.
    fn accept(&mut self, _element: &ElementView) -> bool {
        true
    }

    fn on_tree(&mut self, _element: &ElementView) {}

    fn on_blob(&mut self, _element: &ElementView) {}

    fn on_manifest_ref(&mut self, _element: &ElementView) {}

    /// Called for absent objects only; damaged objects go to `on_damaged`.
    fn on_missing(&mut self, _element: &ElementView) {}

    fn on_damaged(&mut self, _element: &ElementView) {}

    fn on_malformed(&mut self, _element: &ElementView) {}

    fn on_skipped(&mut self, _element: &ElementView) {}
}

fn dispatch(visitor: &mut dyn TreeVisitor, element: &ElementView) {
    match element.kind {
        ViewKind::Blob => visitor.on_blob(element),
        ViewKind::Tree { .. } => visitor.on_tree(element),
        ViewKind::ManifestRef { .. } => visitor.on_manifest_ref(element),
        ViewKind::Missing => visitor.on_missing(element),
        ViewKind::Damaged { .. } => visitor.on_damaged(element),
        ViewKind::Malformed { .. } => visitor.on_malformed(element),
        ViewKind::Skipped => visitor.on_skipped(element),
    }
}

impl TreeView {
    /// Pre-order traversal: each element before its children, children in
    /// name order.
    pub fn visit(&self, visitor: &mut dyn TreeVisitor) {
        let mut stack = vec![self.root_id()];
        while let Some(node) = stack.pop() {
            let element = self.get(node);
            dispatch(visitor, element);
            if element.is_container() && visitor.accept(element) {
                stack.extend(element.children().iter().rev().copied());
            }
        }
    }

    /// Post-order traversal: children first, parent last, no early exit.
    pub fn visit_dfs(&self, visitor: &mut dyn TreeVisitor) {
        let mut stack: Vec<(NodeId, bool)> = vec![(self.root_id(), false)];
        while let Some((node, expanded)) = stack.pop() {
            let element = self.get(node);
            if expanded || !element.is_container() {
                dispatch(visitor, element);
                continue;
            }
            stack.push((node, true));
            stack.extend(element.children().iter().rev().map(|&child| (child, false)));
        }
    }
}
