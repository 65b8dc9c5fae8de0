//! Role and relationship based access decisions
//!
//! Pure functions over pre-fetched facts; callers look up link approval
//! and patient sets before asking. No I/O happens here.

use serde::{Deserialize, Serialize};

/// Account role - determines which side of a link a user can sit on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Records and owns memories
    Patient,

    /// Views and interacts with linked patients' memories
    Family,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "patient" => Some(Role::Patient),
            "family" => Some(Role::Family),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Family => "family",
        }
    }
}

/// The requesting user, as the guard sees them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: i64,
    pub role: Option<Role>,
}

impl Viewer {
    /// Unknown role strings yield a viewer with no role, which every
    /// cross-user predicate denies.
    pub fn new(user_id: i64, role: &str) -> Self {
        Self {
            user_id,
            role: Role::parse(role),
        }
    }

    pub fn is_patient(&self) -> bool {
        self.role == Some(Role::Patient)
    }

    pub fn is_family(&self) -> bool {
        self.role == Some(Role::Family)
    }
}

/// Which memory owners a viewer may read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryScope {
    /// A patient: own memories only
    Own(i64),
    /// A family member: memories of approved patients
    Patients(Vec<i64>),
    /// No visible memories
    Empty,
}

impl MemoryScope {
    pub fn contains(&self, owner_id: i64) -> bool {
        match self {
            MemoryScope::Own(id) => *id == owner_id,
            MemoryScope::Patients(ids) => ids.contains(&owner_id),
            MemoryScope::Empty => false,
        }
    }

    pub fn owner_ids(&self) -> &[i64] {
        match self {
            MemoryScope::Own(id) => std::slice::from_ref(id),
            MemoryScope::Patients(ids) => ids,
            MemoryScope::Empty => &[],
        }
    }
}

/// Can this viewer see a memory owned by `owner_id`?
/// `approved` is the pre-fetched result of the ledger lookup
/// (viewer as family member, owner as patient).
pub fn can_view(viewer: &Viewer, owner_id: i64, approved: bool) -> bool {
    viewer.user_id == owner_id || (viewer.is_family() && approved)
}

/// Can this viewer modify a memory owned by `owner_id`?
/// There is no separate write role; an approved family member may edit.
pub fn can_edit(viewer: &Viewer, owner_id: i64, approved: bool) -> bool {
    can_view(viewer, owner_id, approved)
}

/// The set of owners whose memories the viewer may list.
/// `approved_patients` is the pre-fetched ledger result for a family viewer.
pub fn scope(viewer: &Viewer, approved_patients: Vec<i64>) -> MemoryScope {
    match viewer.role {
        Some(Role::Patient) => MemoryScope::Own(viewer.user_id),
        Some(Role::Family) => MemoryScope::Patients(approved_patients),
        None => MemoryScope::Empty,
    }
}
