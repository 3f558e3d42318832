use kiln_types::Cid;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so a block and a bundle with identical bytes never share an
/// identifier.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for individual blocks (tree nodes, documents).
    pub const BLOCK: Self = Self {
        domain: "kiln-block-v1",
    };
    /// Hasher for whole bundles.
    pub const BUNDLE: Self = Self {
        domain: "kiln-bundle-v1",
    };
    /// Hasher for change-feed events.
    pub const EVENT: Self = Self {
        domain: "kiln-event-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Cid {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Cid::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as JSON with domain separation.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<Cid, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Verify that data produces the expected identifier.
    pub fn verify(&self, data: &[u8], expected: &Cid) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Errors from hashing and block coding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: Cid, computed: Cid },
}
