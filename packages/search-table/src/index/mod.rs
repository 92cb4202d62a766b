//! Index management: lifecycle (create-if-absent) and routing

pub mod lifecycle;
pub mod router;

pub use lifecycle::{IndexEnsureOutcome, IndexLifecycleManager, IndexLifecycleState, IndexSettings};
pub use router::{IndexRouter, IndexRouting, IndexTarget};
