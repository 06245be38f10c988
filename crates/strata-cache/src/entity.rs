//! Cached entity kinds and the sources that load them.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use strata_common::{BlockPos, ChunkId, ObjectId};
use strata_world::{ChunkCodec, MapBlock, MapChunk, MapObject};

use crate::backend::{Backend, RecordBytes};
use crate::error::{BackendError, BackendResult};

/// A value a cache can hold.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Cache key
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Kind name, used as the backend namespace and in logs.
    const KIND: &'static str;

    /// Key under which this value is stored.
    fn key(&self) -> Self::Key;
}

/// An entity with a byte encoding for record backends.
pub trait Record: Entity {
    /// Backend key bytes.
    fn key_bytes(key: &Self::Key) -> Vec<u8>;

    /// Encodes the value.
    fn encode(&self) -> BackendResult<Vec<u8>>;

    /// Decodes a value stored under `key`.
    fn decode(key: &Self::Key, bytes: &[u8]) -> BackendResult<Self>;
}

impl Entity for MapChunk {
    type Key = ChunkId;
    const KIND: &'static str = "chunk";

    fn key(&self) -> ChunkId {
        self.id()
    }
}

impl Record for MapChunk {
    fn key_bytes(key: &ChunkId) -> Vec<u8> {
        key.raw().to_be_bytes().to_vec()
    }

    fn encode(&self) -> BackendResult<Vec<u8>> {
        Ok(ChunkCodec::encode(self)?)
    }

    fn decode(key: &ChunkId, bytes: &[u8]) -> BackendResult<Self> {
        let chunk = ChunkCodec::decode(bytes)?;
        if chunk.id() != *key {
            return Err(BackendError::Serialization(format!(
                "record for chunk {key} holds chunk {}",
                chunk.id()
            )));
        }
        Ok(chunk)
    }
}

impl Entity for MapBlock {
    type Key = BlockPos;
    const KIND: &'static str = "block";

    fn key(&self) -> BlockPos {
        self.pos
    }
}

impl Entity for MapObject {
    type Key = ObjectId;
    const KIND: &'static str = "object";

    fn key(&self) -> ObjectId {
        self.id
    }
}

impl Record for MapObject {
    fn key_bytes(key: &ObjectId) -> Vec<u8> {
        key.raw().to_be_bytes().to_vec()
    }

    fn encode(&self) -> BackendResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| BackendError::Serialization(e.to_string()))
    }

    fn decode(_key: &ObjectId, bytes: &[u8]) -> BackendResult<Self> {
        bincode::deserialize(bytes).map_err(|e| BackendError::Serialization(e.to_string()))
    }
}

/// Where a cache loads missing values from and writes values to.
///
/// Implementations block; caches call them off the async workers.
pub trait Source<E: Entity>: Send + Sync + 'static {
    /// Loads a value, `None` if the source has no record.
    fn fetch(&self, key: &E::Key) -> BackendResult<Option<E>>;

    /// Writes one value.
    fn store(&self, key: &E::Key, value: &E) -> BackendResult<()>;

    /// Writes several values in one call.
    fn store_all(&self, values: &[(E::Key, E)]) -> BackendResult<()>;
}

/// Adapts a byte-oriented [`Backend`] to a typed [`Source`].
#[derive(Debug)]
pub struct RecordSource<B: ?Sized> {
    backend: Arc<B>,
}

impl<B: ?Sized> RecordSource<B> {
    /// Wraps a backend.
    #[must_use]
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

impl<E: Record, B: Backend + ?Sized> Source<E> for RecordSource<B> {
    fn fetch(&self, key: &E::Key) -> BackendResult<Option<E>> {
        self.backend
            .get(E::KIND, &E::key_bytes(key))?
            .map(|bytes| E::decode(key, &bytes))
            .transpose()
    }

    fn store(&self, key: &E::Key, value: &E) -> BackendResult<()> {
        self.backend.set(E::KIND, &E::key_bytes(key), &value.encode()?)
    }

    fn store_all(&self, values: &[(E::Key, E)]) -> BackendResult<()> {
        let records = values
            .iter()
            .map(|(key, value)| Ok((E::key_bytes(key), value.encode()?)))
            .collect::<BackendResult<Vec<RecordBytes>>>()?;
        self.backend.set_all(E::KIND, &records)
    }
}

/// Source of a cache whose values are owned and persisted elsewhere.
///
/// Nothing is ever found; writes are refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSource;

impl<E: Entity> Source<E> for DetachedSource {
    fn fetch(&self, _key: &E::Key) -> BackendResult<Option<E>> {
        Ok(None)
    }

    fn store(&self, _key: &E::Key, _value: &E) -> BackendResult<()> {
        Err(BackendError::ReadOnly(E::KIND))
    }

    fn store_all(&self, _values: &[(E::Key, E)]) -> BackendResult<()> {
        Err(BackendError::ReadOnly(E::KIND))
    }
}
