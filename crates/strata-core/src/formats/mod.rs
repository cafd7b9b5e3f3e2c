//! # Formats
//!
//! Binary formats persisted outside the backing repository.

mod persistence;

pub use persistence::{
    DescriptorHeader, PartitionDescriptor, descriptor_from_bytes, descriptor_to_bytes,
};
