use hive_types::ManifestKey;

/// Outcome of [`crate::push`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Objects the remote lacked and received.
    pub objects_sent: usize,
    /// Objects the remote already held, by hash.
    pub objects_skipped: usize,
    pub manifests_sent: Vec<ManifestKey>,
    /// Manifests already present on the remote.
    pub manifests_present: Vec<ManifestKey>,
    /// Bundle size on the wire.
    pub bytes_transferred: u64,
}

impl PushReport {
    pub fn is_noop(&self) -> bool {
        self.objects_sent == 0 && self.manifests_sent.is_empty()
    }
}

/// Outcome of [`crate::fetch`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub objects_received: usize,
    /// Objects this store already held.
    pub objects_skipped: usize,
    pub manifests_received: Vec<ManifestKey>,
    pub manifests_present: Vec<ManifestKey>,
    pub bytes_transferred: u64,
}

impl FetchReport {
    pub fn is_noop(&self) -> bool {
        self.objects_received == 0 && self.manifests_received.is_empty()
    }
}
