//! Per-rank GVA segments: slice handles, wire-safe exchange descriptors,
//! and the segment variants that own them.

pub mod exchange;
pub mod registry;
pub mod segment;
pub mod slice;

pub use exchange::{EntityExchangeDescriptor, ExchangeDescriptor, ExchangeMaterial, SegmentKind};
pub use registry::{Backing, SharedBackingRegistry};
pub use segment::{MemSegment, SegmentCommon, SegmentOps, SegmentOptions};
pub use slice::MemSlice;
