// 📝 Audit Recorder - field-level diffs for every mutation
//
// Every mutation runs: capture_before → persist → capture_after → diff → store.
// The mutation path calls each step itself; nothing is hooked globally.
//
// Entries are append-only. The only thing that ever changes on a stored
// entry is `is_sync_pending`, flipped by the sync service once the entry has
// been propagated to the remote store.

use crate::db;
use crate::entities::{EntityClass, House, Member, MemberObligation};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

pub const HOUSE_TRACKED_FIELDS: &[&str] = &["home_id", "house_name", "family_name", "location_name"];

pub const MEMBER_TRACKED_FIELDS: &[&str] = &[
    "member_id",
    "name",
    "surname",
    "date_of_birth",
    "adhar",
    "is_guardian",
    "status",
    "house",
];

pub const OBLIGATION_TRACKED_FIELDS: &[&str] = &["amount", "paid_status"];

// ============================================================================
// ACTION KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "CREATE",
            ActionKind::Update => "UPDATE",
            ActionKind::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CREATE" => Some(ActionKind::Create),
            "UPDATE" => Some(ActionKind::Update),
            "DELETE" => Some(ActionKind::Delete),
            _ => None,
        }
    }
}

// ============================================================================
// AUDIT ENTRY
// ============================================================================

/// One changed field; `None` marks absence (stored as JSON null)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub entity_class: EntityClass,
    /// Display identifier of the affected record
    pub object_id: String,
    pub action: ActionKind,
    pub description: String,
    pub fields_changed: BTreeMap<String, FieldChange>,
    pub is_sync_pending: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_class: EntityClass,
        object_id: &str,
        action: ActionKind,
        description: String,
        fields_changed: BTreeMap<String, FieldChange>,
    ) -> Self {
        AuditEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            entity_class,
            object_id: object_id.to_string(),
            action,
            description,
            fields_changed,
            is_sync_pending: true,
            timestamp: Utc::now(),
        }
    }
}

/// Recent-actions feed filter; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub entity_class: Option<EntityClass>,
    pub action: Option<ActionKind>,
    pub pending: Option<bool>,
    pub object_id: Option<String>,
}

/// One page of the feed, newest first
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
    /// 1-based
    pub page: usize,
    pub page_size: usize,
}

impl AuditPage {
    pub fn has_next(&self) -> bool {
        self.page * self.page_size < self.total
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Tracked field values of one record at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    fields: BTreeMap<String, Option<String>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Snapshot::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn set(&mut self, field: &str, value: Option<String>) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }

    fn value(&self, field: &str) -> Option<String> {
        self.fields.get(field).cloned().flatten()
    }

    pub fn of_house(house: &House) -> Self {
        let mut snapshot = Snapshot::empty();
        snapshot.set("home_id", Some(house.home_id.clone()));
        snapshot.set("house_name", Some(house.house_name.clone()));
        snapshot.set("family_name", Some(house.family_name.clone()));
        snapshot.set("location_name", Some(house.location_name.clone()));
        snapshot
    }

    /// The house link is compared by the house's display id, so it needs the store
    pub fn of_member(conn: &Connection, member: &Member) -> Self {
        let house_id = match member.house {
            Some(key) => match db::get_house(conn, key) {
                Ok(Some(house)) => Some(house.home_id),
                Ok(None) => {
                    debug!(member = %member.member_id, house = key, "Broken house reference in snapshot");
                    None
                }
                Err(e) => {
                    warn!(member = %member.member_id, error = %e, "House lookup failed in snapshot");
                    None
                }
            },
            None => None,
        };

        let mut snapshot = Snapshot::empty();
        snapshot.set("member_id", Some(member.member_id.clone()));
        snapshot.set("name", Some(member.name.clone()));
        snapshot.set("surname", Some(member.surname.clone()));
        snapshot.set("date_of_birth", Some(serialize_date(member.date_of_birth)));
        snapshot.set("adhar", member.adhar.clone());
        // "true" / "false", lowercase on the sync feed
        snapshot.set("is_guardian", Some(member.is_guardian.to_string()));
        snapshot.set("status", Some(member.status.as_str().to_string()));
        snapshot.set("house", house_id);
        snapshot
    }

    pub fn of_obligation(obligation: &MemberObligation) -> Self {
        let mut snapshot = Snapshot::empty();
        snapshot.set("amount", Some(format!("{:.2}", obligation.amount)));
        snapshot.set("paid_status", Some(obligation.paid_status.as_str().to_string()));
        snapshot
    }
}

/// Dates are stored and diffed as ISO-8601
pub fn serialize_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ============================================================================
// AUDIT RECORDER
// ============================================================================

pub struct AuditRecorder {
    /// Whitelist of compared fields per entity class
    tracked: HashMap<EntityClass, Vec<String>>,
}

impl AuditRecorder {
    pub fn new() -> Self {
        let mut tracked = HashMap::new();
        for (class, fields) in [
            (EntityClass::House, HOUSE_TRACKED_FIELDS),
            (EntityClass::Member, MEMBER_TRACKED_FIELDS),
            (EntityClass::Obligation, OBLIGATION_TRACKED_FIELDS),
        ] {
            tracked.insert(class, fields.iter().map(|f| f.to_string()).collect());
        }
        AuditRecorder { tracked }
    }

    /// Replace the compared fields for one class
    pub fn with_tracked_fields(mut self, class: EntityClass, fields: &[&str]) -> Self {
        self.tracked
            .insert(class, fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn tracked_fields(&self, class: EntityClass) -> &[String] {
        self.tracked.get(&class).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// State of a record right before it is mutated.
    /// New records (no key) and keys with no row give an empty snapshot.
    pub fn capture_before(
        &self,
        conn: &Connection,
        class: EntityClass,
        key: Option<i64>,
    ) -> Result<Snapshot> {
        let key = match key {
            Some(key) => key,
            None => return Ok(Snapshot::empty()),
        };

        let snapshot = match class {
            EntityClass::House => db::get_house(conn, key)?.map(|h| Snapshot::of_house(&h)),
            EntityClass::Member => db::get_member(conn, key)?.map(|m| Snapshot::of_member(conn, &m)),
            EntityClass::Obligation => {
                db::get_obligation(conn, key)?.map(|o| Snapshot::of_obligation(&o))
            }
        };

        Ok(snapshot.unwrap_or_default())
    }

    /// Diff two snapshots of one record.
    ///
    /// Empty `before` → CREATE. Otherwise UPDATE listing only the tracked
    /// fields that differ, or `None` when nothing tracked changed.
    pub fn record_change(
        &self,
        class: EntityClass,
        object_id: &str,
        before: &Snapshot,
        after: &Snapshot,
        description: String,
    ) -> Option<AuditEntry> {
        if before.is_empty() {
            return Some(AuditEntry::new(
                class,
                object_id,
                ActionKind::Create,
                description,
                BTreeMap::new(),
            ));
        }

        let changes = self.diff(class, before, after);
        if changes.is_empty() {
            return None;
        }

        Some(AuditEntry::new(
            class,
            object_id,
            ActionKind::Update,
            description,
            changes,
        ))
    }

    /// DELETE entry; the display id must be captured before the row is removed
    pub fn record_delete(&self, class: EntityClass, object_id: &str, description: String) -> AuditEntry {
        AuditEntry::new(class, object_id, ActionKind::Delete, description, BTreeMap::new())
    }

    pub fn diff(
        &self,
        class: EntityClass,
        before: &Snapshot,
        after: &Snapshot,
    ) -> BTreeMap<String, FieldChange> {
        let mut changes = BTreeMap::new();
        for field in self.tracked_fields(class) {
            let old = before.value(field);
            let new = after.value(field);
            if old != new {
                changes.insert(field.clone(), FieldChange { old, new });
            }
        }
        changes
    }

    /// Best-effort write: a failed audit insert is logged and never fails the
    /// mutation it describes. Returns whether the entry was stored.
    pub fn store(&self, conn: &Connection, entry: &AuditEntry) -> bool {
        match db::insert_audit_entry(conn, entry) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    class = %entry.entity_class,
                    object_id = %entry.object_id,
                    action = entry.action.as_str(),
                    error = %e,
                    "Audit entry could not be stored; continuing without it"
                );
                false
            }
        }
    }
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Description for member updates, flagging guardian changes
pub fn member_update_description(member: &Member, entry: &AuditEntry) -> String {
    let mut desc = format!("Member updated: {}", member.name);
    if entry.fields_changed.contains_key("is_guardian") {
        desc.push_str(" (Guardian Status Changed)");
    }
    desc
}

// ============================================================================
// TESTS
// ============================================================================
