//! Core allocation abstractions and claim accounting.

pub mod allocator;
pub mod audit;
pub mod claim;
pub mod contracts;
pub mod error;
pub mod params;
pub mod registry;

pub use allocator::{AcquireRequest, BackendAllocator, Reservation};
pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use claim::{ClaimCategory, ClaimHold, GenClaim, Session, StatusSnapshot};
pub use contracts::{ArtifactStore, GenerationBackend, ModelCatalog, ModelDescriptor, SaveTarget};
pub use error::{AppResult, DispatchError, GENERIC_INTERNAL_MESSAGE};
pub use params::{clean_param_name, Artifact, GenerationParams, RANDOM_SEED};
pub use registry::{BackendFilter, BackendId, BackendInfo, BackendRegistry, BackendSnapshot, Occupancy};
pub use tokio_util::sync::CancellationToken;
