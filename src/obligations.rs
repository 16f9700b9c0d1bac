// 💰 Obligations - assigning sub-collections to members and tracking payment
//
// Every function runs on the caller's connection, so the Registry can wrap
// each call in one transaction. Assignments and status changes are audited
// under the Obligation class, keyed by the obligation row id.

use crate::audit::{AuditRecorder, Snapshot};
use crate::db;
use crate::entities::{
    AreaKey, EntityClass, Member, MemberKey, MemberObligation, ObligationKey, PaidStatus,
    SubCollection, SubCollectionKey,
};
use crate::error::{RegistryError, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkAssignReport {
    pub created: Vec<ObligationKey>,
    /// Members that already owed this sub-collection
    pub skipped: Vec<MemberKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObligationStatistics {
    pub subcollection: SubCollectionKey,
    pub total: usize,
    pub paid: usize,
    pub pending: usize,
    pub overdue: usize,
    pub partial: usize,
    pub total_amount: f64,
    pub paid_amount: f64,
}

impl ObligationStatistics {
    pub fn outstanding_amount(&self) -> f64 {
        self.total_amount - self.paid_amount
    }
}

fn load_subcollection(conn: &Connection, key: SubCollectionKey) -> Result<SubCollection> {
    db::get_subcollection(conn, key)?
        .ok_or_else(|| RegistryError::NotFound(format!("subcollection {}", key)))
}

fn load_member(conn: &Connection, key: MemberKey) -> Result<Member> {
    db::get_member(conn, key)?.ok_or_else(|| RegistryError::NotFound(format!("member {}", key)))
}

/// Area of the member's house; any break in member → house → area is none
fn area_of(conn: &Connection, member: &Member) -> Option<AreaKey> {
    let house_key = member.house?;
    match db::get_house(conn, house_key) {
        Ok(Some(house)) => Some(house.area),
        Ok(None) => {
            debug!(member = %member.member_id, house = house_key, "Obligation area unresolved: broken house link");
            None
        }
        Err(e) => {
            debug!(member = %member.member_id, error = %e, "Obligation area lookup failed");
            None
        }
    }
}

/// Create one obligation. `amount` defaults to the sub-collection amount.
pub fn assign(
    conn: &Connection,
    recorder: &AuditRecorder,
    subcollection: &SubCollection,
    member_key: MemberKey,
    amount: Option<f64>,
) -> Result<MemberObligation> {
    let sub_key = subcollection
        .key
        .ok_or_else(|| RegistryError::NotFound("subcollection without key".to_string()))?;
    let member = load_member(conn, member_key)?;

    let mut obligation = MemberObligation::new(sub_key, member_key, amount.unwrap_or(subcollection.amount));
    if obligation.amount < 0.0 {
        return Err(RegistryError::Validation("amount: Must not be negative".to_string()));
    }
    obligation.area = area_of(conn, &member);

    let key = db::insert_obligation(conn, &obligation)?;
    obligation.key = Some(key);

    let description = format!("Obligation assigned: {} to {}", subcollection.name, member.name);
    if let Some(entry) = recorder.record_change(
        EntityClass::Obligation,
        &key.to_string(),
        &Snapshot::empty(),
        &Snapshot::of_obligation(&obligation),
        description,
    ) {
        recorder.store(conn, &entry);
    }

    Ok(obligation)
}

/// Assign a sub-collection to many members, skipping those who already owe it
pub fn bulk_assign(
    conn: &Connection,
    recorder: &AuditRecorder,
    subcollection_key: SubCollectionKey,
    members: &[MemberKey],
) -> Result<BulkAssignReport> {
    let subcollection = load_subcollection(conn, subcollection_key)?;
    let mut existing: HashSet<MemberKey> = db::obligations_for_subcollection(conn, subcollection_key)?
        .into_iter()
        .map(|o| o.member)
        .collect();

    let mut report = BulkAssignReport::default();
    for &member_key in members {
        if !existing.insert(member_key) {
            report.skipped.push(member_key);
            continue;
        }
        let obligation = assign(conn, recorder, &subcollection, member_key, None)?;
        if let Some(key) = obligation.key {
            report.created.push(key);
        }
    }

    info!(
        subcollection = %subcollection.name,
        created = report.created.len(),
        skipped = report.skipped.len(),
        "Bulk obligation assignment"
    );
    Ok(report)
}

/// Change the paid status (and optionally the amount) of one obligation
pub fn update_status(
    conn: &Connection,
    recorder: &AuditRecorder,
    key: ObligationKey,
    status: PaidStatus,
    amount: Option<f64>,
) -> Result<MemberObligation> {
    let before = recorder.capture_before(conn, EntityClass::Obligation, Some(key))?;
    let mut obligation = db::get_obligation(conn, key)?
        .ok_or_else(|| RegistryError::NotFound(format!("obligation {}", key)))?;

    obligation.paid_status = status;
    if let Some(amount) = amount {
        if amount < 0.0 {
            return Err(RegistryError::Validation("amount: Must not be negative".to_string()));
        }
        obligation.amount = amount;
    }
    db::update_obligation(conn, &obligation)?;

    let subcollection = load_subcollection(conn, obligation.subcollection)?;
    let member_name = db::get_member(conn, obligation.member)?
        .map(|m| m.name)
        .unwrap_or_default();
    let description = format!("Obligation updated: {} for {}", subcollection.name, member_name);

    if let Some(entry) = recorder.record_change(
        EntityClass::Obligation,
        &key.to_string(),
        &before,
        &Snapshot::of_obligation(&obligation),
        description,
    ) {
        recorder.store(conn, &entry);
    }

    Ok(obligation)
}

/// Counts and totals for one sub-collection; the sub-collection is required
pub fn subcollection_statistics(
    conn: &Connection,
    subcollection: Option<SubCollectionKey>,
) -> Result<ObligationStatistics> {
    let key = subcollection.ok_or_else(|| {
        RegistryError::InvalidQuery("subcollection parameter is required".to_string())
    })?;
    load_subcollection(conn, key)?;

    let mut stats = ObligationStatistics {
        subcollection: key,
        ..ObligationStatistics::default()
    };

    for obligation in db::obligations_for_subcollection(conn, key)? {
        stats.total += 1;
        stats.total_amount += obligation.amount;
        match obligation.paid_status {
            PaidStatus::Paid => {
                stats.paid += 1;
                stats.paid_amount += obligation.amount;
            }
            PaidStatus::Pending => stats.pending += 1,
            PaidStatus::Overdue => stats.overdue += 1,
            PaidStatus::Partial => stats.partial += 1,
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{ActionKind, AuditFilter};
    use crate::entities::{Area, Collection, House};
    use chrono::NaiveDate;

    struct Fixture {
        conn: Connection,
        subcollection: SubCollection,
        area: AreaKey,
        members: Vec<MemberKey>,
    }

    fn fixture() -> Fixture {
        let conn = db::open_in_memory().unwrap();
        let area = db::insert_area(&conn, &Area::new("North", "")).unwrap();
        let mut house = House::new("TestHouse", "TestFamily", area);
        house.home_id = "1001".to_string();
        let house_key = db::insert_house(&conn, &house).unwrap();

        let mut members = Vec::new();
        for (i, name) in ["Ali", "Aysha", "Irfan"].iter().enumerate() {
            let mut member = Member::new(name, "", NaiveDate::from_ymd_opt(1990, 1, 1).unwrap());
            member.member_id = (1001 + i).to_string();
            if i < 2 {
                member.house = Some(house_key);
            } else {
                member.house = Some(999); // broken
            }
            members.push(db::insert_member(&conn, &member).unwrap());
        }

        let collection = db::insert_collection(&conn, &Collection::new("Eid Paisa", "")).unwrap();
        let mut subcollection = SubCollection::new(
            collection,
            "2025",
            "Eid Paisa 2025",
            100.0,
            NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
        );
        subcollection.key = Some(db::insert_subcollection(&conn, &subcollection).unwrap());

        Fixture {
            conn,
            subcollection,
            area,
            members,
        }
    }

    #[test]
    fn test_assign_denormalizes_area_and_audits() {
        let f = fixture();
        let recorder = AuditRecorder::new();

        let obligation = assign(&f.conn, &recorder, &f.subcollection, f.members[0], None).unwrap();
        assert_eq!(obligation.area, Some(f.area));
        assert_eq!(obligation.amount, 100.0);

        let (entries, total) = db::list_audit_entries(&f.conn, &AuditFilter::default(), 10, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(entries[0].action, ActionKind::Create);
        assert_eq!(entries[0].description, "Obligation assigned: Eid Paisa 2025 to Ali");
    }

    #[test]
    fn test_broken_house_gives_no_area() {
        let f = fixture();
        let obligation = assign(&f.conn, &AuditRecorder::new(), &f.subcollection, f.members[2], Some(50.0)).unwrap();
        assert_eq!(obligation.area, None);
        assert_eq!(obligation.amount, 50.0);
    }

    #[test]
    fn test_bulk_assign_skips_existing() {
        let f = fixture();
        let recorder = AuditRecorder::new();
        let sub_key = f.subcollection.key.unwrap();

        assign(&f.conn, &recorder, &f.subcollection, f.members[0], None).unwrap();
        let report = bulk_assign(&f.conn, &recorder, sub_key, &f.members).unwrap();

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.skipped, vec![f.members[0]]);
        assert_eq!(db::obligations_for_subcollection(&f.conn, sub_key).unwrap().len(), 3);
    }

    #[test]
    fn test_update_status_records_diff() {
        let f = fixture();
        let recorder = AuditRecorder::new();
        let obligation = assign(&f.conn, &recorder, &f.subcollection, f.members[0], None).unwrap();
        let key = obligation.key.unwrap();

        update_status(&f.conn, &recorder, key, PaidStatus::Paid, None).unwrap();
        // unchanged status: nothing tracked differs, no entry
        update_status(&f.conn, &recorder, key, PaidStatus::Paid, None).unwrap();

        let filter = AuditFilter {
            action: Some(ActionKind::Update),
            ..AuditFilter::default()
        };
        let (entries, total) = db::list_audit_entries(&f.conn, &filter, 10, 0).unwrap();
        assert_eq!(total, 1);
        let change = &entries[0].fields_changed["paid_status"];
        assert_eq!(change.old.as_deref(), Some("pending"));
        assert_eq!(change.new.as_deref(), Some("paid"));
        assert_eq!(entries[0].object_id, key.to_string());
    }

    #[test]
    fn test_statistics() {
        let f = fixture();
        let recorder = AuditRecorder::new();
        let sub_key = f.subcollection.key.unwrap();
        let report = bulk_assign(&f.conn, &recorder, sub_key, &f.members).unwrap();
        update_status(&f.conn, &recorder, report.created[0], PaidStatus::Paid, None).unwrap();
        update_status(&f.conn, &recorder, report.created[1], PaidStatus::Overdue, None).unwrap();

        let stats = subcollection_statistics(&f.conn, Some(sub_key)).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.paid, 1);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total_amount, 300.0);
        assert_eq!(stats.outstanding_amount(), 200.0);
    }

    #[test]
    fn test_statistics_requires_subcollection() {
        let f = fixture();
        let err = subcollection_statistics(&f.conn, None).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidQuery(_)));

        let err = subcollection_statistics(&f.conn, Some(404)).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }
}
