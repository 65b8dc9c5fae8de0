//! Connect codes, the relationship ledger, and the roster mirror
//!
//! The connect flow and every destructive roster/link operation run as one
//! SQLite transaction, so the ledger and the mirror never drift: a link
//! exists iff its connect-flow roster row exists.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{
    self, connect_codes, family_links, roster, users, ConnectCodeRow, MemoryDb, RosterRow, UserRow,
};
use crate::error::ApiError;

/// An issued or looked-up connect code
#[derive(Debug, Clone, Serialize)]
pub struct CodeResponse {
    pub code: String,
    pub expires_at: String,
    pub expires_in_minutes: i64,
}

/// Result of redeeming a connect code
#[derive(Debug, Clone, Serialize)]
pub struct ConnectResponse {
    pub message: String,
    pub patient: ConnectedPatient,
    pub bidirectional: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedPatient {
    pub id: i64,
    pub username: String,
}

/// One linked patient, as shown to a family member
#[derive(Debug, Clone, Serialize)]
pub struct PatientSummary {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub avatar: Option<String>,
    pub relation: String,
}

/// Fields accepted when adding a manual roster entry
#[derive(Debug, Clone, Deserialize)]
pub struct NewRosterEntry {
    pub name: String,
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Partial roster update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRosterEntry {
    pub name: Option<String>,
    pub relation: Option<String>,
    pub avatar_url: Option<String>,
}

/// What a roster deletion did, including the mirrored ledger side
#[derive(Debug, Clone, Serialize)]
pub struct RosterDeleteOutcome {
    pub message: String,
    pub deleted_member: String,
    pub bidirectional: bool,
}

/// Code, ledger and roster operations
pub struct FamilyService {
    db: Arc<MemoryDb>,
    code_validity_minutes: i64,
}

impl FamilyService {
    pub fn new(db: Arc<MemoryDb>, code_validity_minutes: i64) -> Self {
        Self {
            db,
            code_validity_minutes,
        }
    }

    // -- Connect codes --

    /// Issue a fresh code for a patient, replacing any previous one
    pub fn issue_code(&self, user: &UserRow) -> Result<CodeResponse, ApiError> {
        ensure_patient(user)?;
        let row = self
            .db
            .with_conn(|conn| connect_codes::issue(conn, user.id, self.code_validity_minutes))?;

        info!(patient_id = user.id, "Issued connect code");
        Ok(code_response(&row))
    }

    /// The patient's live code; absent and expired are indistinguishable
    pub fn current_code(&self, user: &UserRow) -> Result<CodeResponse, ApiError> {
        ensure_patient(user)?;
        let row = self
            .db
            .with_conn(|conn| connect_codes::get_for_patient(conn, user.id))?;

        match row {
            Some(ref code) if code.is_valid(Utc::now()) => Ok(code_response(code)),
            _ => Err(ApiError::NotFound("No active code.".to_string())),
        }
    }

    /// Remove the patient's code if one exists. Succeeds either way.
    pub fn clear_code(&self, user: &UserRow) -> Result<(), ApiError> {
        ensure_patient(user)?;
        self.db
            .with_conn(|conn| connect_codes::delete_for_patient(conn, user.id))?;
        Ok(())
    }

    /// Redeem a code: establish the link, mirror the roster row, and
    /// consume the code, all in one transaction.
    pub fn connect(&self, user: &UserRow, raw_code: &str) -> Result<ConnectResponse, ApiError> {
        if !user.is_family() {
            return Err(ApiError::PermissionDenied(
                "Only family members can connect with a code.".to_string(),
            ));
        }

        let code = raw_code.trim().to_uppercase();
        if code.is_empty() {
            return Err(ApiError::Validation("Code is required.".to_string()));
        }

        let (patient_id, patient_username) = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let row = connect_codes::find_by_code(&tx, &code)?
                .filter(|c| c.is_valid(Utc::now()))
                .ok_or_else(invalid_code)?;
            let patient = users::get_user(&tx, row.patient_id)?.ok_or_else(invalid_code)?;

            family_links::establish(&tx, patient.id, user.id, "")?;
            roster::get_or_create_linked(&tx, patient.id, user.id, &user.username, "Family Member")?;
            connect_codes::delete_by_id(&tx, row.id)?;

            tx.commit()?;
            Ok((patient.id, patient.username))
        })?;

        info!(
            patient_id,
            family_id = user.id,
            "Connected family member via code"
        );

        Ok(ConnectResponse {
            message: "Connected successfully".to_string(),
            patient: ConnectedPatient {
                id: patient_id,
                username: patient_username,
            },
            bidirectional: true,
        })
    }

    /// Patients linked to this family member, newest link first
    pub fn my_patients(&self, user: &UserRow) -> Result<Vec<PatientSummary>, ApiError> {
        if !user.is_family() {
            return Err(ApiError::PermissionDenied(
                "Only family members can view their patients.".to_string(),
            ));
        }

        self.db.with_conn(|conn| {
            let links = family_links::list_approved_for_family(conn, user.id)?;
            let mut patients = Vec::with_capacity(links.len());
            for link in links {
                // Cascade rules make a dangling patient impossible; skip defensively anyway
                let Some(patient) = users::get_user(conn, link.patient_id)? else {
                    continue;
                };
                patients.push(PatientSummary {
                    id: patient.id,
                    name: patient
                        .full_name
                        .clone()
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| patient.username.clone()),
                    username: patient.username,
                    avatar: None,
                    relation: link.relation,
                });
            }
            Ok(patients)
        })
    }

    // -- Roster --

    pub fn list_roster(&self, user: &UserRow) -> Result<Vec<RosterRow>, ApiError> {
        self.db.with_conn(|conn| roster::list_for_user(conn, user.id))
    }

    pub fn add_roster_entry(
        &self,
        user: &UserRow,
        entry: NewRosterEntry,
    ) -> Result<RosterRow, ApiError> {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(ApiError::Validation("Name is required.".to_string()));
        }

        let result = self.db.with_conn(|conn| {
            roster::create(conn, user.id, name, &entry.relation, entry.avatar_url.as_deref())
        });
        match result {
            Err(ref e) if db::is_unique_violation(e) => Err(ApiError::Validation(
                "A family member with this name already exists.".to_string(),
            )),
            other => other,
        }
    }

    pub fn get_roster_entry(&self, user: &UserRow, id: i64) -> Result<RosterRow, ApiError> {
        self.db
            .with_conn(|conn| owned_roster_row(conn, user.id, id))
    }

    pub fn update_roster_entry(
        &self,
        user: &UserRow,
        id: i64,
        update: UpdateRosterEntry,
    ) -> Result<RosterRow, ApiError> {
        let result = self.db.with_conn(|conn| {
            owned_roster_row(conn, user.id, id)?;
            roster::update(
                conn,
                id,
                update.name.as_deref(),
                update.relation.as_deref(),
                update.avatar_url.as_deref(),
            )
        });
        match result {
            Err(ref e) if db::is_unique_violation(e) => Err(ApiError::Validation(
                "A family member with this name already exists.".to_string(),
            )),
            other => other,
        }
    }

    /// Delete a roster entry. A connect-flow row also removes the ledger
    /// link for its linked user, in the same transaction; manual rows
    /// never touch the ledger.
    pub fn delete_roster_entry(
        &self,
        user: &UserRow,
        id: i64,
    ) -> Result<RosterDeleteOutcome, ApiError> {
        let (name, link_removed) = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let row = owned_roster_row(&tx, user.id, id)?;
            roster::delete(&tx, row.id)?;
            let link_removed = match row.linked_user_id {
                Some(family_id) => family_links::delete_between(&tx, user.id, family_id)?,
                None => false,
            };

            tx.commit()?;
            Ok((row.name, link_removed))
        })?;

        info!(
            user_id = user.id,
            roster_id = id,
            link_removed,
            "Removed roster entry"
        );

        Ok(RosterDeleteOutcome {
            message: "Family member removed".to_string(),
            deleted_member: name,
            bidirectional: link_removed,
        })
    }

    // -- Ledger --

    /// Revoke the link between this patient and a family user, removing
    /// the mirrored roster row in the same transaction. Returns whether a
    /// link existed.
    pub fn revoke_link(&self, patient: &UserRow, family_user_id: i64) -> Result<bool, ApiError> {
        let removed = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let removed = family_links::delete_between(&tx, patient.id, family_user_id)?;
            if let Some(row) = roster::find_linked(&tx, patient.id, family_user_id)? {
                roster::delete(&tx, row.id)?;
            }

            tx.commit()?;
            Ok(removed)
        })?;

        if removed {
            info!(
                patient_id = patient.id,
                family_id = family_user_id,
                "Revoked family link"
            );
        }
        Ok(removed)
    }

    /// Ledger predicate used by access checks
    pub fn is_approved(&self, family_member_id: i64, patient_id: i64) -> Result<bool, ApiError> {
        self.db
            .with_conn(|conn| family_links::is_approved(conn, family_member_id, patient_id))
    }
}

fn ensure_patient(user: &UserRow) -> Result<(), ApiError> {
    if user.is_patient() {
        Ok(())
    } else {
        Err(ApiError::PermissionDenied(
            "Only patients can manage a code.".to_string(),
        ))
    }
}

fn invalid_code() -> ApiError {
    ApiError::InvalidCode("Invalid or expired code.".to_string())
}

fn owned_roster_row(conn: &Connection, user_id: i64, id: i64) -> Result<RosterRow, ApiError> {
    match roster::get(conn, id)? {
        Some(row) if row.user_id == user_id => Ok(row),
        _ => Err(ApiError::NotFound("Family member not found".to_string())),
    }
}

fn code_response(row: &ConnectCodeRow) -> CodeResponse {
    let expires_in_minutes = NaiveDateTime::parse_from_str(&row.expires_at, connect_codes::DATETIME_FMT)
        .map(|naive| (naive.and_utc() - Utc::now()).num_minutes().max(0))
        .unwrap_or(0);

    CodeResponse {
        code: row.code.clone(),
        expires_at: row.expires_at.clone(),
        expires_in_minutes,
    }
}
