//! Typed envelopes flowing from decoders to sinks.

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Type identifier derived from a string hash.
///
/// Sinks compare it against the types they care about before downcasting the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvelopeTypeId(u64);

impl EnvelopeTypeId {
    /// Creates a TypeId from a string (e.g., "erc20.transfer")
    pub fn new(type_name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        type_name.hash(&mut hasher);
        EnvelopeTypeId(hasher.finish())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

pub type TypeId = EnvelopeTypeId;

/// Trait for typed envelope bodies
pub trait TypedBody: Send + Sync {
    fn envelope_type_id(&self) -> TypeId;
    fn as_any(&self) -> &dyn Any;
}

/// Decoded payload plus the metadata sinks filter on.
pub struct Envelope {
    /// Unique identifier, stable for a given log
    pub id: String,

    pub type_id: TypeId,

    /// The decoded data (downcast by sinks)
    pub body: Box<dyn TypedBody>,

    pub metadata: HashMap<String, String>,

    /// Wall-clock time the envelope was built
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(id: String, body: Box<dyn TypedBody>, metadata: HashMap<String, String>) -> Self {
        let type_id = body.envelope_type_id();
        Self {
            id,
            type_id,
            body,
            metadata,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Tries to downcast the body to a concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.body.as_any().downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("type_id", &self.type_id)
            .field("metadata", &self.metadata)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
