use std::fmt;

use hive_model::EntryType;
use hive_types::{ManifestKey, ObjectId};

/// Index of an element inside its [`TreeView`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Path of an element relative to the scan root. The root's path is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementPath(Vec<String>);

impl ElementPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Final segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        f.write_str(&self.0.join("/"))
    }
}

impl<S: AsRef<str>> FromIterator<S> for ElementPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|s| s.as_ref().to_string()).collect())
    }
}

/// What an element resolved to when it was scanned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewKind {
    /// File content. Leaves are not read during a scan unless blob
    /// verification is enabled.
    Blob,
    /// A decoded tree; children are sorted by name.
    Tree { children: Vec<NodeId> },
    /// A tree entry naming another manifest.
    ///
    /// `root` is the referenced manifest's root tree, `None` if that manifest
    /// does not exist. When present, the only child is the element for that
    /// root tree, sharing this element's path.
    ManifestRef {
        key: ManifestKey,
        root: Option<ObjectId>,
        children: Vec<NodeId>,
    },
    /// The object is absent from storage.
    Missing,
    /// The object is present but does not hash-verify.
    Damaged { reason: String },
    /// The object hash-verifies but does not decode as the entry's type.
    /// The bytes are sound and may be valid content elsewhere.
    Malformed { reason: String },
    /// Not scanned: beyond the depth limit or part of a reference cycle.
    Skipped,
}

/// One element of a scanned tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementView {
    /// Object the element stands for.
    pub id: ObjectId,
    /// Type recorded in the parent tree entry (`Tree` for a scan root).
    pub entry_type: EntryType,
    pub path: ElementPath,
    pub parent: Option<NodeId>,
    pub kind: ViewKind,
}

impl ElementView {
    /// Entry name, empty for the scan root.
    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("")
    }

    /// Child elements of a tree or manifest reference.
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            ViewKind::Tree { children } | ViewKind::ManifestRef { children, .. } => children,
            _ => &[],
        }
    }

    /// Trees and manifest references can be descended into.
    pub fn is_container(&self) -> bool {
        matches!(self.kind, ViewKind::Tree { .. } | ViewKind::ManifestRef { .. })
    }

    /// Absent, damaged or malformed: none of them yields usable content.
    pub fn is_missing(&self) -> bool {
        matches!(
            self.kind,
            ViewKind::Missing | ViewKind::Damaged { .. } | ViewKind::Malformed { .. }
        )
    }

    pub fn is_damaged(&self) -> bool {
        matches!(self.kind, ViewKind::Damaged { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self.kind, ViewKind::Malformed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.kind, ViewKind::Skipped)
    }
}

/// Arena holding a scanned tree. Node 0 is the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeView {
    nodes: Vec<ElementView>,
}

impl TreeView {
    pub(crate) fn from_nodes(nodes: Vec<ElementView>) -> Self {
        debug_assert!(!nodes.is_empty(), "a view always has a root");
        Self { nodes }
    }

    pub fn root_id(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root(&self) -> &ElementView {
        &self.nodes[0]
    }

    /// Element by arena index.
    pub fn get(&self, node: NodeId) -> &ElementView {
        &self.nodes[node.0]
    }

    pub fn children(&self, node: NodeId) -> impl Iterator<Item = (NodeId, &ElementView)> {
        self.get(node)
            .children()
            .iter()
            .map(move |&child| (child, self.get(child)))
    }

    /// Every element, in arena (breadth-first insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ElementView)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, element)| (NodeId(index), element))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First element at `path`. A manifest reference and its root tree share
    /// a path; the reference comes first.
    pub fn find(&self, path: &ElementPath) -> Option<&ElementView> {
        let mut current = self.root_id();
        for segment in path.segments() {
            let element = self.get(current);
            let mut children = element.children();
            // Step through a reference into its root tree.
            if let ViewKind::ManifestRef { .. } = element.kind {
                match children.first() {
                    Some(&inner) => children = self.get(inner).children(),
                    None => return None,
                }
            }
            current = *children
                .iter()
                .find(|&&child| self.get(child).name() == segment)?;
        }
        Some(self.get(current))
    }

    /// Elements whose object is absent, damaged or malformed.
    pub fn missing(&self) -> impl Iterator<Item = &ElementView> {
        self.nodes.iter().filter(|e| e.is_missing())
    }

    pub fn damaged(&self) -> impl Iterator<Item = &ElementView> {
        self.nodes.iter().filter(|e| e.is_damaged())
    }

    pub fn malformed(&self) -> impl Iterator<Item = &ElementView> {
        self.nodes.iter().filter(|e| e.is_malformed())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ElementView> {
        self.nodes.iter().filter(|e| e.is_skipped())
    }

    /// Manifest references whose target manifest does not exist.
    pub fn dangling_refs(&self) -> impl Iterator<Item = &ElementView> {
        self.nodes
            .iter()
            .filter(|e| matches!(e.kind, ViewKind::ManifestRef { root: None, .. }))
    }
}
