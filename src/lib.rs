// Community Registry - Core Library
// Identity resolution and relationship engine for houses, members and
// their obligations. Used by the CLI and by tests.

pub mod audit;
pub mod config;
pub mod db;
pub mod deduplication;
pub mod directory;
pub mod entities;
pub mod error;
pub mod family;
pub mod identifiers;
pub mod obligations;
pub mod registry;
pub mod search;
pub mod similarity;

// Re-export commonly used types
pub use audit::{
    ActionKind, AuditEntry, AuditFilter, AuditPage, AuditRecorder, FieldChange, Snapshot,
};
pub use config::{DatabaseConfig, EngineConfig, RegistryConfig, SyncConfig};
pub use deduplication::{DuplicateDetector, DuplicateMatch, FieldSource, MemberCandidate};
pub use directory::RelationDirectory;
pub use entities::{
    Area, Collection, EntityClass, Gender, House, Member, MemberObligation, MemberStatus,
    PaidStatus, PersonName, Relation, SubCollection,
};
pub use error::{RegistryError, Result};
pub use family::{FamilyGraphResolver, FamilyTree};
pub use identifiers::SequentialIdAllocator;
pub use obligations::{BulkAssignReport, ObligationStatistics};
pub use registry::Registry;
pub use search::{FuzzySearchIndex, ParentMatch, ParentQuery, SearchHit};
pub use similarity::SimilarityScorer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
