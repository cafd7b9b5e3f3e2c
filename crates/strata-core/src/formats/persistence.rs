//! # Partition Descriptor Format
//!
//! Binary serialization of a store's identity: its partition id and the
//! names of the kinds it serves. Kind names are resolved back to descriptors
//! through a `KindCatalog` on restore, never by loading code.
//!
//! Format: Header (5 bytes) + postcard-serialized descriptor.
//! - 4 bytes: Magic ("STPD")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is parsed.

use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES, MAX_DESCRIPTOR_SIZE};
use crate::registry::{KindCatalog, TypeRegistry};
use crate::types::{PartitionId, StoreError};
use serde::{Deserialize, Serialize};

/// Header length in bytes.
const HEADER_LEN: usize = 5;

// =============================================================================
// HEADER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl DescriptorHeader {
    /// Header of the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if &self.magic != MAGIC_BYTES {
            return Err(StoreError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(StoreError::SerializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let [a, b, c, d] = self.magic;
        [a, b, c, d, self.version]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        match bytes {
            [a, b, c, d, version, ..] => Ok(Self {
                magic: [*a, *b, *c, *d],
                version: *version,
            }),
            _ => Err(StoreError::SerializationError(
                "Header too short".to_string(),
            )),
        }
    }
}

impl Default for DescriptorHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// DESCRIPTOR
// =============================================================================

/// Persisted identity of one element store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    /// Raw partition id.
    pub partition: u64,
    /// Registered kind names, in registry order.
    pub kinds: Vec<String>,
}

impl PartitionDescriptor {
    #[must_use]
    pub fn new(partition: PartitionId, kinds: Vec<String>) -> Self {
        Self {
            partition: partition.value(),
            kinds,
        }
    }

    #[must_use]
    pub fn partition_id(&self) -> PartitionId {
        PartitionId(self.partition)
    }

    /// Rebuild the registry. Every kind name must resolve.
    pub fn restore(&self, catalog: &dyn KindCatalog) -> Result<TypeRegistry, StoreError> {
        let mut registry = TypeRegistry::new();
        for name in &self.kinds {
            let kind = catalog
                .resolve(name)
                .ok_or_else(|| StoreError::UnknownKind(name.clone()))?;
            registry.add(kind);
        }
        Ok(registry)
    }
}

/// Serialize a descriptor (header + payload).
pub fn descriptor_to_bytes(descriptor: &PartitionDescriptor) -> Result<Vec<u8>, StoreError> {
    let payload = postcard::to_stdvec(descriptor)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&DescriptorHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a descriptor, validating size and header first.
pub fn descriptor_from_bytes(bytes: &[u8]) -> Result<PartitionDescriptor, StoreError> {
    if bytes.len() > MAX_DESCRIPTOR_SIZE {
        return Err(StoreError::SerializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_DESCRIPTOR_SIZE
        )));
    }
    let header = DescriptorHeader::from_bytes(bytes)?;
    header.validate()?;

    let payload = bytes.get(HEADER_LEN..).unwrap_or_default();
    postcard::from_bytes(payload).map_err(|e| {
        StoreError::SerializationError(format!("Failed to deserialize descriptor: {e}"))
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BuiltinCatalog, CATEGORY_KIND, VIEW_KIND};

    fn descriptor() -> PartitionDescriptor {
        PartitionDescriptor::new(
            PartitionId(0xAAAA_0000_0000_0000),
            vec![VIEW_KIND.to_string(), CATEGORY_KIND.to_string()],
        )
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let bytes = descriptor_to_bytes(&descriptor()).expect("serialize");
        assert_eq!(&bytes[..4], MAGIC_BYTES);
        let restored = descriptor_from_bytes(&bytes).expect("deserialize");
        assert_eq!(restored, descriptor());
        assert_eq!(descriptor_to_bytes(&restored).expect("reserialize"), bytes);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = descriptor_to_bytes(&descriptor()).expect("serialize");
        bytes[..4].copy_from_slice(b"XXXX");
        assert!(descriptor_from_bytes(&bytes).is_err());
    }

    #[test]
    fn future_version_rejected() {
        let mut bytes = descriptor_to_bytes(&descriptor()).expect("serialize");
        bytes[4] = FORMAT_VERSION + 1;
        assert!(matches!(
            descriptor_from_bytes(&bytes),
            Err(StoreError::SerializationError(msg)) if msg.contains("Unsupported version")
        ));
    }

    #[test]
    fn short_input_rejected() {
        assert!(descriptor_from_bytes(b"STP").is_err());
    }

    #[test]
    fn restore_resolves_through_catalog() {
        let registry = descriptor()
            .restore(&BuiltinCatalog::new())
            .expect("restore");
        assert!(registry.contains(VIEW_KIND));

        let unknown = PartitionDescriptor::new(PartitionId(1), vec!["ghost".into()]);
        assert!(matches!(
            unknown.restore(&BuiltinCatalog::new()),
            Err(StoreError::UnknownKind(name)) if name == "ghost"
        ));
    }
}
