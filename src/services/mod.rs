//! Domain services gluing the access rules to storage
//!
//! Services own the database handle and the object store; route handlers
//! stay thin and translate between HTTP and these calls.

pub mod family_service;
pub mod memory_service;

pub use family_service::{
    CodeResponse, ConnectResponse, FamilyService, NewRosterEntry, PatientSummary,
    RosterDeleteOutcome, UpdateRosterEntry,
};
pub use memory_service::{
    BulkAdded, CreateMemoryRequest, FileUpload, LikeOutcome, MemoryDetail, MemoryInteractions,
    MemoryMedia, MemoryNavigation, MemoryService, RecordingMeta, UpdatePersonEntry,
    UpdateTagEntry,
};
