pub mod access;
pub mod audit;
pub mod link;

pub use access::{AccessEvent, DeviceClass, EnrichedAccessRecord};
pub use audit::AuditEntry;
pub use link::ShortLinkRecord;
