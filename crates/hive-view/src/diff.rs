//! Two-snapshot diff.
//!
//! Containers present on both sides with different ids report a
//! [`DiffKind::Modified`] entry for themselves (the root included) and are
//! compared child by child. Content present on one side only is reported
//! leaf by leaf. An entry whose type changes, such as a file replaced by a
//! directory, is a removal of the old content plus an addition of the new.

use std::cmp::Ordering;

use hive_model::EntryType;
use hive_types::ObjectId;

use crate::element::{ElementPath, ElementView, NodeId, TreeView, ViewKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
}

/// One difference between two views.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: ElementPath,
    pub kind: DiffKind,
    pub entry_type: EntryType,
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
}

/// Differences between an old and a new [`TreeView`], in path order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub entries: Vec<DiffEntry>,
}

enum Work {
    Pair {
        old: NodeId,
        new: NodeId,
        emit_self: bool,
    },
    Removed(NodeId),
    Added(NodeId),
}

impl TreeDiff {
    pub fn compute(old: &TreeView, new: &TreeView) -> Self {
        let mut entries = Vec::new();
        let mut stack = vec![Work::Pair {
            old: old.root_id(),
            new: new.root_id(),
            emit_self: true,
        }];

        while let Some(work) = stack.pop() {
            match work {
                Work::Removed(node) => leaves(old, node, |e| {
                    entries.push(DiffEntry {
                        path: e.path.clone(),
                        kind: DiffKind::Removed,
                        entry_type: e.entry_type,
                        old: Some(e.id),
                        new: None,
                    })
                }),
                Work::Added(node) => leaves(new, node, |e| {
                    entries.push(DiffEntry {
                        path: e.path.clone(),
                        kind: DiffKind::Added,
                        entry_type: e.entry_type,
                        old: None,
                        new: Some(e.id),
                    })
                }),
                Work::Pair {
                    old: o,
                    new: n,
                    emit_self,
                } => {
                    let (oe, ne) = (old.get(o), new.get(n));
                    if oe.entry_type != ne.entry_type {
                        // Pushed in reverse: removal is reported first.
                        stack.push(Work::Added(n));
                        stack.push(Work::Removed(o));
                        continue;
                    }
                    if oe.id == ne.id {
                        continue;
                    }
                    if emit_self || !(oe.is_container() && ne.is_container()) {
                        entries.push(DiffEntry {
                            path: ne.path.clone(),
                            kind: DiffKind::Modified,
                            entry_type: ne.entry_type,
                            old: Some(oe.id),
                            new: Some(ne.id),
                        });
                    }
                    if oe.is_container() && ne.is_container() {
                        // The root tree under a reference shares its path.
                        let inner = matches!(oe.kind, ViewKind::ManifestRef { .. });
                        let mut pending = Vec::new();
                        merge_children(old, oe, new, ne, |work| pending.push(work), !inner);
                        stack.extend(pending.into_iter().rev());
                    }
                }
            }
        }

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn added(&self) -> impl Iterator<Item = &DiffEntry> {
        self.of_kind(DiffKind::Added)
    }

    pub fn removed(&self) -> impl Iterator<Item = &DiffEntry> {
        self.of_kind(DiffKind::Removed)
    }

    pub fn modified(&self) -> impl Iterator<Item = &DiffEntry> {
        self.of_kind(DiffKind::Modified)
    }

    fn of_kind(&self, kind: DiffKind) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }
}

fn merge_children(
    old: &TreeView,
    oe: &ElementView,
    new: &TreeView,
    ne: &ElementView,
    mut push: impl FnMut(Work),
    emit_self: bool,
) {
    let (oc, nc) = (oe.children(), ne.children());
    let (mut i, mut j) = (0, 0);
    while i < oc.len() || j < nc.len() {
        let order = match (oc.get(i), nc.get(j)) {
            (Some(&a), Some(&b)) => old.get(a).name().cmp(new.get(b).name()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Less => {
                push(Work::Removed(oc[i]));
                i += 1;
            }
            Ordering::Greater => {
                push(Work::Added(nc[j]));
                j += 1;
            }
            Ordering::Equal => {
                push(Work::Pair {
                    old: oc[i],
                    new: nc[j],
                    emit_self,
                });
                i += 1;
                j += 1;
            }
        }
    }
}

/// Report every leaf below `node`, or `node` itself if it has no children.
fn leaves(view: &TreeView, node: NodeId, mut emit: impl FnMut(&ElementView)) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        let element = view.get(current);
        let children = element.children();
        if children.is_empty() {
            emit(element);
        } else {
            stack.extend(children.iter().rev().copied());
        }
    }
}
