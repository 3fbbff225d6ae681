use std::fmt;

/// Opaque transaction identifier; the manager only compares it.
pub type TxnId = u64;

/// Composite resource identifier used by the schema and shard mutation paths.
///
/// A key with `shard: None` names a whole collection; `Some(id)` names one shard
/// of it. The manager treats every key independently, the parent relation is
/// only used by [`crate::hierarchy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub collection: u64,
    pub shard: Option<u64>,
}

impl ResourceKey {
    pub fn collection(collection: u64) -> Self {
        Self {
            collection,
            shard: None,
        }
    }

    pub fn shard(collection: u64, shard: u64) -> Self {
        Self {
            collection,
            shard: Some(shard),
        }
    }

    /// The collection key owning this shard, `None` for collection keys.
    pub fn parent(&self) -> Option<ResourceKey> {
        self.shard.map(|_| ResourceKey::collection(self.collection))
    }

    /// Root-to-leaf path ending at this key.
    pub fn path(&self) -> Vec<ResourceKey> {
        match self.parent() {
            Some(parent) => vec![parent, *self],
            None => vec![*self],
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shard {
            Some(shard) => write!(f, "{}/{}", self.collection, shard),
            None => write!(f, "{}", self.collection),
        }
    }
}
