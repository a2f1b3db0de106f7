//! Snapshot construction: resolve a tree recursively into a [`TreeView`].
//!
//! The scan is breadth-first over an explicit queue, so arbitrarily deep
//! trees never grow the call stack. Every tree and manifest-reference object
//! is read and hash-checked; blobs are only checked for presence unless
//! blob verification is enabled.

use std::collections::VecDeque;

use hive_model::{CodecTable, EntryType, ManifestRef, Tree};
use hive_store::{ManifestDatabase, ObjectDatabase, ObjectState};
use hive_types::{ManifestKey, ObjectId};
use tracing::debug;

use crate::element::{ElementPath, ElementView, NodeId, TreeView, ViewKind};
use crate::error::{ViewError, ViewResult};

/// Reads objects and manifests to build [`TreeView`]s.
pub struct TreeScanner<'a> {
    objects: &'a dyn ObjectDatabase,
    manifests: &'a dyn ManifestDatabase,
    codecs: &'a CodecTable,
    max_depth: Option<usize>,
    verify_blobs: bool,
}

struct Pending {
    node: usize,
    /// Manifests whose roots enclose this node, for cycle detection.
    chain: Vec<ManifestKey>,
}

enum Loaded<T> {
    Ok(T),
    Missing,
    Damaged(String),
    Malformed(String),
}

impl<'a> TreeScanner<'a> {
    pub fn new(
        objects: &'a dyn ObjectDatabase,
        manifests: &'a dyn ManifestDatabase,
        codecs: &'a CodecTable,
    ) -> Self {
        Self {
            objects,
            manifests,
            codecs,
            max_depth: None,
            verify_blobs: false,
        }
    }

    /// Elements deeper than `depth` become [`ViewKind::Skipped`]. The scan
    /// root has depth 0.
    pub fn max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Read and hash every blob instead of only checking presence.
    pub fn verify_blobs(mut self, verify: bool) -> Self {
        self.verify_blobs = verify;
        self
    }

    /// Scan the tree rooted at `root`.
    pub fn scan_tree(&self, root: ObjectId) -> ViewResult<TreeView> {
        self.scan(root, Vec::new())
    }

    /// Scan a manifest's root tree.
    pub fn scan_manifest(&self, key: &ManifestKey) -> ViewResult<TreeView> {
        let manifest = self
            .manifests
            .get_manifest(key)?
            .ok_or_else(|| ViewError::ManifestNotFound(key.clone()))?;
        self.scan(manifest.root(), vec![key.clone()])
    }

    fn scan(&self, root: ObjectId, chain: Vec<ManifestKey>) -> ViewResult<TreeView> {
        let mut nodes = vec![ElementView {
            id: root,
            entry_type: EntryType::Tree,
            path: ElementPath::root(),
            parent: None,
            kind: ViewKind::Skipped,
        }];
        let mut queue = VecDeque::from([Pending { node: 0, chain }]);

        while let Some(Pending { node, chain }) = queue.pop_front() {
            let (id, entry_type, depth) = {
                let element = &nodes[node];
                (element.id, element.entry_type, element.path.depth())
            };
            if self.max_depth.is_some_and(|max| depth > max) {
                continue;
            }

            let kind = match entry_type {
                EntryType::Blob => self.blob_kind(&id)?,
                EntryType::Tree => match self.load_tree(&id)? {
                    Loaded::Ok(tree) => {
                        let mut children = Vec::with_capacity(tree.len());
                        for (key, child_id) in tree.iter() {
                            let child = nodes.len();
                            let path = nodes[node].path.child(&key.name);
                            nodes.push(ElementView {
                                id: *child_id,
                                entry_type: key.entry_type,
                                path,
                                parent: Some(NodeId(node)),
                                kind: ViewKind::Skipped,
                            });
                            children.push(NodeId(child));
                            queue.push_back(Pending {
                                node: child,
                                chain: chain.clone(),
                            });
                        }
                        ViewKind::Tree { children }
                    }
                    Loaded::Missing => ViewKind::Missing,
                    Loaded::Damaged(reason) => ViewKind::Damaged { reason },
                    Loaded::Malformed(reason) => ViewKind::Malformed { reason },
                },
                EntryType::Manifest => match self.load_ref(&id)? {
                    Loaded::Ok(reference) => {
                        let key = reference.key;
                        match self.manifests.get_manifest(&key)? {
                            None => {
                                debug!(key = %key, "dangling manifest reference");
                                ViewKind::ManifestRef {
                                    key,
                                    root: None,
                                    children: Vec::new(),
                                }
                            }
                            Some(target) => {
                                let child = nodes.len();
                                let path = nodes[node].path.clone();
                                nodes.push(ElementView {
                                    id: target.root(),
                                    entry_type: EntryType::Tree,
                                    path,
                                    parent: Some(NodeId(node)),
                                    kind: ViewKind::Skipped,
                                });
                                if chain.contains(&key) {
                                    debug!(key = %key, "manifest reference cycle");
                                } else {
                                    let mut inner = chain.clone();
                                    inner.push(key.clone());
                                    queue.push_back(Pending {
                                        node: child,
                                        chain: inner,
                                    });
                                }
                                ViewKind::ManifestRef {
                                    key,
                                    root: Some(target.root()),
                                    children: vec![NodeId(child)],
                                }
                            }
                        }
                    }
                    Loaded::Missing => ViewKind::Missing,
                    Loaded::Damaged(reason) => ViewKind::Damaged { reason },
                    Loaded::Malformed(reason) => ViewKind::Malformed { reason },
                },
            };
            match &kind {
                ViewKind::Damaged { reason } => {
                    debug!(path = %nodes[node].path, id = %id.short_hex(), reason = %reason, "damaged object")
                }
                ViewKind::Malformed { reason } => {
                    debug!(path = %nodes[node].path, id = %id.short_hex(), reason = %reason, "malformed object")
                }
                _ => {}
            }
            nodes[node].kind = kind;
        }

        Ok(TreeView::from_nodes(nodes))
    }

    fn blob_kind(&self, id: &ObjectId) -> ViewResult<ViewKind> {
        if self.verify_blobs {
            return Ok(match self.objects.verify_object(id)? {
                ObjectState::Intact => ViewKind::Blob,
                ObjectState::Missing => ViewKind::Missing,
                ObjectState::Damaged(reason) => ViewKind::Damaged { reason },
            });
        }
        Ok(if self.objects.has_object(id)? {
            ViewKind::Blob
        } else {
            ViewKind::Missing
        })
    }

    fn load_bytes(&self, id: &ObjectId) -> ViewResult<Loaded<Vec<u8>>> {
        let Some(data) = self.objects.read_object(id)? else {
            return Ok(Loaded::Missing);
        };
        let actual = ObjectId::from_bytes(&data);
        if actual != *id {
            return Ok(Loaded::Damaged(format!("content hashes to {actual}")));
        }
        Ok(Loaded::Ok(data))
    }

    fn load_tree(&self, id: &ObjectId) -> ViewResult<Loaded<Tree>> {
        Ok(match self.load_bytes(id)? {
            Loaded::Ok(data) => match self.codecs.from_bytes::<Tree>(&data) {
                Ok(tree) => Loaded::Ok(tree),
                Err(e) => Loaded::Malformed(format!("undecodable tree: {e}")),
            },
            Loaded::Missing => Loaded::Missing,
            Loaded::Damaged(reason) => Loaded::Damaged(reason),
            Loaded::Malformed(reason) => Loaded::Malformed(reason),
        })
    }

    fn load_ref(&self, id: &ObjectId) -> ViewResult<Loaded<ManifestRef>> {
        Ok(match self.load_bytes(id)? {
            Loaded::Ok(data) => match ManifestRef::decode(&data) {
                Ok(reference) => Loaded::Ok(reference),
                Err(e) => Loaded::Malformed(format!("undecodable manifest reference: {e}")),
            },
            Loaded::Missing => Loaded::Missing,
            Loaded::Damaged(reason) => Loaded::Damaged(reason),
            Loaded::Malformed(reason) => Loaded::Malformed(reason),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hive_model::{Manifest, TreeBuilder};
    use hive_store::{InMemoryManifestDatabase, InMemoryObjectDatabase};

    pub(crate) struct Fixture {
        pub objects: InMemoryObjectDatabase,
        pub manifests: InMemoryManifestDatabase,
        pub codecs: CodecTable,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                objects: InMemoryObjectDatabase::new(),
                manifests: InMemoryManifestDatabase::new(),
                codecs: CodecTable::standard(),
            }
        }

        pub fn scanner(&self) -> TreeScanner<'_> {
            TreeScanner::new(&self.objects, &self.manifests, &self.codecs)
        }

        pub fn blob(&self, data: &str) -> ObjectId {
            self.objects.add_object(data.as_bytes()).unwrap()
        }

        pub fn tree(&self, build: impl FnOnce(&mut TreeBuilder)) -> ObjectId {
            let mut builder = TreeBuilder::new();
            build(&mut builder);
            let bytes = self.codecs.to_bytes(&builder.build()).unwrap();
            self.objects.add_object(&bytes).unwrap()
        }

        pub fn manifest(&self, key: &str, root: ObjectId) -> ManifestKey {
            let key: ManifestKey = key.parse().unwrap();
            let manifest = Manifest::builder(key.clone()).root(root).build().unwrap();
            self.manifests.add_manifest(&manifest).unwrap();
            key
        }

        pub fn reference(&self, key: &str) -> ObjectId {
            let bytes = ManifestRef::new(key.parse().unwrap()).encode().unwrap();
            self.objects.add_object(&bytes).unwrap()
        }

        /// `{test.txt, dir/file.txt}`
        pub fn baseline(&self) -> ObjectId {
            let file = self.blob("file content");
            let dir = self.tree(|t| {
                t.add_blob("file.txt", file).unwrap();
            });
            let test = self.blob("test content");
            self.tree(|t| {
                t.add_blob("test.txt", test).unwrap();
                t.add_tree("dir", dir).unwrap();
            })
        }
    }

    fn path(s: &str) -> ElementPath {
        s.split('/').collect()
    }

    #[test]
    fn scans_nested_trees_in_name_order() {
        let fx = Fixture::new();
        let root = fx.baseline();
        let view = fx.scanner().scan_tree(root).unwrap();

        assert_eq!(view.len(), 4);
        let names: Vec<&str> = view.children(view.root_id()).map(|(_, e)| e.name()).collect();
        assert_eq!(names, vec!["dir", "test.txt"]);
        let file = view.find(&path("dir/file.txt")).unwrap();
        assert_eq!(file.kind, ViewKind::Blob);
        assert_eq!(file.path.to_string(), "dir/file.txt");
        assert_eq!(view.missing().count(), 0);
    }

    #[test]
    fn absent_blob_is_missing() {
        let fx = Fixture::new();
        let ghost = ObjectId::from_bytes(b"never stored");
        let root = fx.tree(|t| {
            t.add_blob("ghost", ghost).unwrap();
        });
        let view = fx.scanner().scan_tree(root).unwrap();
        let missing: Vec<_> = view.missing().collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, ghost);
    }

    #[test]
    fn missing_root_yields_single_missing_element() {
        let fx = Fixture::new();
        let view = fx.scanner().scan_tree(ObjectId::from_bytes(b"nothing")).unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view.root().kind, ViewKind::Missing);
    }

    #[test]
    fn tampered_tree_is_damaged() {
        let fx = Fixture::new();
        let claimed = ObjectId::from_bytes(b"some tree");
        fx.objects.insert_unchecked(claimed, b"garbage".to_vec());
        let root = fx.tree(|t| {
            t.add_tree("sub", claimed).unwrap();
        });
        let view = fx.scanner().scan_tree(root).unwrap();
        let damaged: Vec<_> = view.damaged().collect();
        assert_eq!(damaged.len(), 1);
        assert_eq!(damaged[0].path.to_string(), "sub");
        assert_eq!(view.malformed().count(), 0);
    }

    #[test]
    fn sound_blob_named_as_tree_is_malformed() {
        let fx = Fixture::new();
        let text = fx.blob("plain text, not a tree");
        let root = fx.tree(|t| {
            t.add_blob("file", text).unwrap();
        });
        let wrong = fx.tree(|t| {
            t.add_tree("sub", text).unwrap();
        });
        assert_eq!(fx.scanner().scan_tree(root).unwrap().missing().count(), 0);

        let view = fx.scanner().scan_tree(wrong).unwrap();
        let malformed: Vec<_> = view.malformed().collect();
        assert_eq!(malformed.len(), 1);
        assert_eq!(malformed[0].id, text);
        assert_eq!(view.damaged().count(), 0);
        assert_eq!(view.missing().count(), 1);
    }

    #[test]
    fn blob_verification_is_opt_in() {
        let fx = Fixture::new();
        let claimed = ObjectId::from_bytes(b"real");
        fx.objects.insert_unchecked(claimed, b"fake".to_vec());
        let root = fx.tree(|t| {
            t.add_blob("f", claimed).unwrap();
        });
        let quick = fx.scanner().scan_tree(root).unwrap();
        assert_eq!(quick.damaged().count(), 0);
        let thorough = fx.scanner().verify_blobs(true).scan_tree(root).unwrap();
        assert_eq!(thorough.damaged().count(), 1);
    }

    #[test]
    fn depth_limit_skips_deep_elements() {
        let fx = Fixture::new();
        let root = fx.baseline();
        let view = fx.scanner().max_depth(Some(1)).scan_tree(root).unwrap();
        let skipped: Vec<_> = view.skipped().map(|e| e.path.to_string()).collect();
        assert_eq!(skipped, vec!["dir/file.txt"]);

        let shallow = fx.scanner().max_depth(Some(0)).scan_tree(root).unwrap();
        assert_eq!(shallow.skipped().count(), 2);
    }

    #[test]
    fn manifest_references_expand_target_root() {
        let fx = Fixture::new();
        let lib_root = fx.tree(|t| {
            t.add_blob("lib.so", fx.blob("binary")).unwrap();
        });
        fx.manifest("lib:1", lib_root);
        let reference = fx.reference("lib:1");
        let app_root = fx.tree(|t| {
            t.add_manifest_ref("deps", reference).unwrap();
        });
        let app = fx.manifest("app:1", app_root);

        let view = fx.scanner().scan_manifest(&app).unwrap();
        let deps = view.find(&path("deps")).unwrap();
        match &deps.kind {
            ViewKind::ManifestRef { key, root, .. } => {
                assert_eq!(key.to_string(), "lib:1");
                assert_eq!(*root, Some(lib_root));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(deps.id, reference);
        assert_eq!(view.find(&path("deps/lib.so")).unwrap().kind, ViewKind::Blob);
    }

    #[test]
    fn dangling_reference_has_no_root() {
        let fx = Fixture::new();
        let reference = fx.reference("gone:1");
        let root = fx.tree(|t| {
            t.add_manifest_ref("dep", reference).unwrap();
        });
        let view = fx.scanner().scan_tree(root).unwrap();
        assert_eq!(view.dangling_refs().count(), 1);
        assert_eq!(view.missing().count(), 0);
    }

    #[test]
    fn reference_cycles_are_skipped() {
        let fx = Fixture::new();
        let reference = fx.reference("loop:1");
        let root = fx.tree(|t| {
            t.add_manifest_ref("self", reference).unwrap();
        });
        let key = fx.manifest("loop:1", root);
        let view = fx.scanner().scan_manifest(&key).unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view.skipped().count(), 1);
    }

    #[test]
    fn unknown_manifest_is_an_error() {
        let fx = Fixture::new();
        let err = fx.scanner().scan_manifest(&"nope:1".parse().unwrap()).unwrap_err();
        assert!(matches!(err, ViewError::ManifestNotFound(_)));
    }
}
