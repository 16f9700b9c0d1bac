// 🏛️ Registry - the mutation pipeline and read queries in one place
//
// Every save runs the same explicit sequence inside one immediate transaction:
//
//   capture_before → allocate display id (creates) → persist
//     → repair reciprocal spouse link → capture_after → diff → store audit entry
//
// The audit write is best-effort: a failed insert is logged and the save
// still commits. Anything else that fails rolls the whole save back,
// including the id reservation.
//
// Search and dedup load a bounded candidate slice (engine.candidate_limit)
// into a RelationDirectory. Family trees query the store directly.

use crate::audit::{member_update_description, AuditEntry, AuditFilter, AuditPage, AuditRecorder, Snapshot};
use crate::config::RegistryConfig;
use crate::db;
use crate::deduplication::{DuplicateDetector, DuplicateMatch};
use crate::directory::RelationDirectory;
use crate::entities::{
    Area, Collection, CollectionKey, EntityClass, House, HouseKey, Member, MemberKey,
    MemberObligation, ObligationKey, PaidStatus, Relation, SubCollection, SubCollectionKey,
};
use crate::error::{RegistryError, Result};
use crate::family::{FamilyGraphResolver, FamilyTree};
use crate::identifiers::SequentialIdAllocator;
use crate::obligations::{self, BulkAssignReport, ObligationStatistics};
use crate::search::{FuzzySearchIndex, ParentMatch, ParentQuery, SearchHit};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

pub struct Registry {
    conn: Connection,
    config: RegistryConfig,
    allocator: SequentialIdAllocator,
    recorder: AuditRecorder,
    detector: DuplicateDetector,
    index: FuzzySearchIndex,
    resolver: FamilyGraphResolver,
}

/// Immediate transaction for a create; a held write lock is an allocation conflict
fn begin_create(conn: &mut Connection, class: EntityClass) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| {
            if db::is_busy(&e) {
                RegistryError::AllocationConflict {
                    class: class.to_string(),
                }
            } else {
                e.into()
            }
        })
}

fn begin(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Check a (new or changed) link on the write path and fill its blank
/// stored name from the target. Unchanged links are left alone so legacy
/// records with dangling links can still be edited.
fn refresh_link(
    conn: &Connection,
    role: &str,
    relation: &mut Relation,
    previous: Option<&Relation>,
) -> Result<()> {
    let key = match relation.key() {
        Some(key) => key,
        None => return Ok(()),
    };
    if previous.map_or(false, |p| p.points_to(key)) {
        return Ok(());
    }

    let target = db::get_member(conn, key)?.ok_or_else(|| RegistryError::broken(role, key))?;
    if let Relation::Linked { known_as, .. } = relation {
        if known_as.is_blank() {
            *known_as = target.person_name();
        }
    }
    Ok(())
}

fn refresh_links(conn: &Connection, member: &mut Member, previous: Option<&Member>) -> Result<()> {
    refresh_link(conn, "father", &mut member.father, previous.map(|p| &p.father))?;
    refresh_link(conn, "mother", &mut member.mother, previous.map(|p| &p.mother))?;
    refresh_link(conn, "spouse", &mut member.spouse, previous.map(|p| &p.spouse))?;
    Ok(())
}

fn ensure_area(conn: &Connection, area: i64) -> Result<()> {
    db::get_area(conn, area)?
        .map(|_| ())
        .ok_or_else(|| RegistryError::broken("area", area))
}

impl Registry {
    pub fn open(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let conn = db::open_database(&config.database)?;
        Ok(Self::with_connection(conn, config))
    }

    /// Registry over an in-memory database (tests, dry runs)
    pub fn in_memory(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let conn = db::open_in_memory()?;
        Ok(Self::with_connection(conn, config))
    }

    fn with_connection(conn: Connection, config: RegistryConfig) -> Self {
        Registry {
            allocator: SequentialIdAllocator::new(),
            recorder: AuditRecorder::new(),
            detector: DuplicateDetector::from_config(&config.engine),
            index: FuzzySearchIndex::from_config(&config.engine),
            resolver: FamilyGraphResolver::new(),
            conn,
            config,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ========================================================================
    // AREAS & COLLECTIONS
    // ========================================================================

    pub fn create_area(&mut self, name: &str, description: &str) -> Result<Area> {
        let mut area = Area::new(name, description);
        if area.name.is_empty() {
            return Err(RegistryError::Validation("name: Required field is empty".to_string()));
        }
        area.key = Some(db::insert_area(&self.conn, &area)?);
        Ok(area)
    }

    /// Existing area with this name, or a new one
    pub fn area_named(&mut self, name: &str) -> Result<Area> {
        match db::get_area_by_name(&self.conn, name)? {
            Some(area) => Ok(area),
            None => self.create_area(name, ""),
        }
    }

    pub fn create_collection(&mut self, name: &str, description: &str) -> Result<CollectionKey> {
        let collection = Collection::new(name, description);
        if collection.name.is_empty() {
            return Err(RegistryError::Validation("name: Required field is empty".to_string()));
        }
        db::insert_collection(&self.conn, &collection)
    }

    pub fn create_subcollection(&mut self, mut subcollection: SubCollection) -> Result<SubCollection> {
        subcollection.validate()?;
        subcollection.key = Some(db::insert_subcollection(&self.conn, &subcollection)?);
        Ok(subcollection)
    }

    // ========================================================================
    // HOUSES
    // ========================================================================

    pub fn house(&self, key: HouseKey) -> Result<House> {
        db::get_house(&self.conn, key)?.ok_or_else(|| RegistryError::NotFound(format!("house {}", key)))
    }

    pub fn house_by_home_id(&self, home_id: &str) -> Result<House> {
        db::get_house_by_home_id(&self.conn, home_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("house {}", home_id)))
    }

    pub fn create_house(&mut self, mut house: House) -> Result<House> {
        house.validate()?;
        let tx = begin_create(&mut self.conn, EntityClass::House)?;
        ensure_area(&tx, house.area)?;

        let before = Snapshot::empty();
        if house.home_id.trim().is_empty() {
            house.home_id = self.allocator.allocate_in(&tx, EntityClass::House)?;
        }
        let key = db::insert_house(&tx, &house)?;
        house.key = Some(key);

        let after = Snapshot::of_house(&house);
        let description = format!("House created: {}", house.house_name);
        if let Some(entry) = self
            .recorder
            .record_change(EntityClass::House, &house.home_id, &before, &after, description)
        {
            self.recorder.store(&tx, &entry);
        }
        tx.commit()?;

        info!(home_id = %house.home_id, name = %house.house_name, "House created");
        self.house(key)
    }

    pub fn update_house(&mut self, mut house: House) -> Result<House> {
        let key = house
            .key
            .ok_or_else(|| RegistryError::NotFound("house without key".to_string()))?;
        house.validate()?;

        let tx = begin(&mut self.conn)?;
        let existing = db::get_house(&tx, key)?.ok_or_else(|| RegistryError::NotFound(format!("house {}", key)))?;
        if existing.area != house.area {
            ensure_area(&tx, house.area)?;
        }
        let before = self.recorder.capture_before(&tx, EntityClass::House, Some(key))?;

        house.home_id = existing.home_id;
        db::update_house(&tx, &house)?;

        let after = Snapshot::of_house(&house);
        let description = format!("House updated: {}", house.house_name);
        if let Some(entry) = self
            .recorder
            .record_change(EntityClass::House, &house.home_id, &before, &after, description)
        {
            self.recorder.store(&tx, &entry);
        }
        tx.commit()?;

        self.house(key)
    }

    pub fn update_house_with<F>(&mut self, key: HouseKey, update: F) -> Result<House>
    where
        F: FnOnce(&mut House),
    {
        let mut house = self.house(key)?;
        update(&mut house);
        self.update_house(house)
    }

    pub fn delete_house(&mut self, key: HouseKey) -> Result<()> {
        let tx = begin(&mut self.conn)?;
        let house = db::get_house(&tx, key)?.ok_or_else(|| RegistryError::NotFound(format!("house {}", key)))?;

        let entry = self.recorder.record_delete(
            EntityClass::House,
            &house.home_id,
            format!("House deleted: {}", house.house_name),
        );
        db::delete_house(&tx, key)?;
        self.recorder.store(&tx, &entry);
        tx.commit()?;

        info!(home_id = %house.home_id, "House deleted");
        Ok(())
    }

    // ========================================================================
    // MEMBERS
    // ========================================================================

    pub fn member(&self, key: MemberKey) -> Result<Member> {
        db::get_member(&self.conn, key)?.ok_or_else(|| RegistryError::NotFound(format!("member {}", key)))
    }

    pub fn member_by_member_id(&self, member_id: &str) -> Result<Member> {
        db::get_member_by_member_id(&self.conn, member_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("member {}", member_id)))
    }

    pub fn create_member(&mut self, mut member: Member) -> Result<Member> {
        member.key = None;
        member.validate()?;

        let tx = begin_create(&mut self.conn, EntityClass::Member)?;
        if let Some(house) = member.house {
            db::get_house(&tx, house)?.ok_or_else(|| RegistryError::broken("house", house))?;
        }
        refresh_links(&tx, &mut member, None)?;

        let before = Snapshot::empty();
        if member.member_id.trim().is_empty() {
            member.member_id = self.allocator.allocate_in(&tx, EntityClass::Member)?;
        }
        let key = db::insert_member(&tx, &member)?;
        member.key = Some(key);

        if let Some(spouse) = member.spouse.key() {
            self.resolver
                .repair_reciprocal(&tx, key, &member.person_name(), spouse)?;
        }

        let after = Snapshot::of_member(&tx, &member);
        let description = format!("Member created: {}", member.name);
        if let Some(entry) = self
            .recorder
            .record_change(EntityClass::Member, &member.member_id, &before, &after, description)
        {
            self.recorder.store(&tx, &entry);
        }
        tx.commit()?;

        info!(member_id = %member.member_id, name = %member.name, "Member created");
        self.member(key)
    }

    pub fn update_member(&mut self, mut member: Member) -> Result<Member> {
        let key = member
            .key
            .ok_or_else(|| RegistryError::NotFound("member without key".to_string()))?;
        member.validate()?;

        let tx = begin(&mut self.conn)?;
        let existing = db::get_member(&tx, key)?.ok_or_else(|| RegistryError::NotFound(format!("member {}", key)))?;
        if let Some(house) = member.house {
            if existing.house != Some(house) {
                db::get_house(&tx, house)?.ok_or_else(|| RegistryError::broken("house", house))?;
            }
        }
        refresh_links(&tx, &mut member, Some(&existing))?;
        // only a new or changed spouse link is mirrored onto the other side
        let new_spouse = member
            .spouse
            .key()
            .filter(|spouse| !existing.spouse.points_to(*spouse));

        let before = self.recorder.capture_before(&tx, EntityClass::Member, Some(key))?;
        member.member_id = existing.member_id;
        db::update_member(&tx, &member)?;

        if let Some(spouse) = new_spouse {
            self.resolver
                .repair_reciprocal(&tx, key, &member.person_name(), spouse)?;
        }

        let after = Snapshot::of_member(&tx, &member);
        if let Some(mut entry) = self.recorder.record_change(
            EntityClass::Member,
            &member.member_id,
            &before,
            &after,
            String::new(),
        ) {
            entry.description = member_update_description(&member, &entry);
            self.recorder.store(&tx, &entry);
        }
        tx.commit()?;

        self.member(key)
    }

    /// Load, modify through the closure, and save through the full pipeline
    pub fn update_member_with<F>(&mut self, key: MemberKey, update: F) -> Result<Member>
    where
        F: FnOnce(&mut Member),
    {
        let mut member = self.member(key)?;
        update(&mut member);
        self.update_member(member)
    }

    pub fn delete_member(&mut self, key: MemberKey) -> Result<()> {
        let tx = begin(&mut self.conn)?;
        let member = db::get_member(&tx, key)?.ok_or_else(|| RegistryError::NotFound(format!("member {}", key)))?;

        let entry = self.recorder.record_delete(
            EntityClass::Member,
            &member.member_id,
            format!("Member deleted: {}", member.name),
        );
        db::delete_member(&tx, key)?;
        self.recorder.store(&tx, &entry);
        tx.commit()?;

        info!(member_id = %member.member_id, "Member deleted");
        Ok(())
    }

    /// Link two existing members as spouses (both directions)
    pub fn set_spouse(&mut self, member: MemberKey, spouse: MemberKey) -> Result<()> {
        let tx = begin(&mut self.conn)?;
        self.resolver.set_spouse(&tx, member, spouse)?;
        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    fn candidates(&self) -> Result<(Vec<Member>, Vec<House>)> {
        let limit = self.config.engine.candidate_limit;
        Ok((db::load_members(&self.conn, limit)?, db::load_houses(&self.conn, limit)?))
    }

    pub fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        let (members, houses) = self.candidates()?;
        let directory = RelationDirectory::new(&members, &houses);
        self.index.search(term, &directory)
    }

    pub fn search_parents(&self, query: &ParentQuery) -> Result<Vec<ParentMatch>> {
        let (members, houses) = self.candidates()?;
        let directory = RelationDirectory::new(&members, &houses);
        self.index.search_parents(query, &directory)
    }

    pub fn house_duplicates(&self, house_name: &str, family_name: &str) -> Result<Vec<DuplicateMatch<House>>> {
        let houses = db::load_houses(&self.conn, self.config.engine.candidate_limit)?;
        self.detector.check_house_duplicates(house_name, family_name, &houses)
    }

    pub fn member_duplicates(&self, name: &str, surname: &str) -> Result<Vec<DuplicateMatch<Member>>> {
        let (members, houses) = self.candidates()?;
        let directory = RelationDirectory::new(&members, &houses);
        self.detector.check_member_duplicates(name, surname, &directory)
    }

    /// Immediate family read straight from the store, not the candidate slice
    pub fn family_tree(&self, key: MemberKey) -> Result<FamilyTree> {
        let member = self.member(key)?;
        self.resolver.family_tree(&self.conn, &member)
    }

    // ========================================================================
    // AUDIT FEED & SYNC
    // ========================================================================

    /// One page (1-based) of the recent-actions feed, newest first
    pub fn recent_actions(&self, filter: &AuditFilter, page: usize, page_size: usize) -> Result<AuditPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let (entries, total) =
            db::list_audit_entries(&self.conn, filter, page_size, (page - 1) * page_size)?;
        Ok(AuditPage {
            entries,
            total,
            page,
            page_size,
        })
    }

    /// Next batch of entries waiting for the remote store, oldest first
    pub fn pending_sync(&self) -> Result<Vec<AuditEntry>> {
        db::pending_sync_entries(&self.conn, self.config.sync.batch_size)
    }

    pub fn mark_synced(&mut self, entry_ids: &[String]) -> Result<usize> {
        let tx = begin(&mut self.conn)?;
        let flipped = db::mark_synced(&tx, entry_ids)?;
        tx.commit()?;
        info!(flipped, remote = ?self.config.sync.remote_name, "Audit entries marked as synced");
        Ok(flipped)
    }

    // ========================================================================
    // OBLIGATIONS
    // ========================================================================

    pub fn assign_obligations(
        &mut self,
        subcollection: SubCollectionKey,
        members: &[MemberKey],
    ) -> Result<BulkAssignReport> {
        let tx = begin(&mut self.conn)?;
        let report = obligations::bulk_assign(&tx, &self.recorder, subcollection, members)?;
        tx.commit()?;
        Ok(report)
    }

    pub fn update_obligation_status(
        &mut self,
        key: ObligationKey,
        status: PaidStatus,
        amount: Option<f64>,
    ) -> Result<MemberObligation> {
        let tx = begin(&mut self.conn)?;
        let obligation = obligations::update_status(&tx, &self.recorder, key, status, amount)?;
        tx.commit()?;
        Ok(obligation)
    }

    pub fn obligation_statistics(&self, subcollection: Option<SubCollectionKey>) -> Result<ObligationStatistics> {
        obligations::subcollection_statistics(&self.conn, subcollection)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ActionKind;
    use crate::entities::PersonName;
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::thread;

    fn registry() -> (Registry, i64) {
        let mut registry = Registry::in_memory(RegistryConfig::default()).unwrap();
        let area = registry.create_area("North", "").unwrap().key.unwrap();
        (registry, area)
    }

    fn dob() -> NaiveDate {
        NaiveDate::from_ymd_opt(1990, 1, 1).unwrap()
    }

    fn entries_for(registry: &Registry, class: EntityClass) -> Vec<AuditEntry> {
        let filter = AuditFilter {
            entity_class: Some(class),
            ..AuditFilter::default()
        };
        registry.recent_actions(&filter, 1, 100).unwrap().entries
    }

    #[test]
    fn test_creates_get_sequential_ids() {
        let (mut registry, area) = registry();

        let first = registry.create_house(House::new("TestHouse", "TestFamily", area)).unwrap();
        let second = registry.create_house(House::new("Rose Villa", "Kareem", area)).unwrap();
        let member = registry.create_member(Member::new("Ali", "", dob())).unwrap();

        assert_eq!(first.home_id, "1001");
        assert_eq!(second.home_id, "1002");
        assert_eq!(member.member_id, "1001");
    }

    #[test]
    fn test_update_records_single_field_diff() {
        let (mut registry, _) = registry();
        let member = registry.create_member(Member::new("Ali", "K", dob())).unwrap();
        let key = member.key.unwrap();

        registry
            .update_member_with(key, |m| m.name = "Aliyu".to_string())
            .unwrap();

        let entries = entries_for(&registry, EntityClass::Member);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, ActionKind::Update);
        assert_eq!(entries[0].fields_changed.len(), 1);
        assert_eq!(entries[0].fields_changed["name"].old.as_deref(), Some("Ali"));
        assert_eq!(entries[0].fields_changed["name"].new.as_deref(), Some("Aliyu"));
        assert_eq!(entries[0].description, "Member updated: Aliyu");
        assert_eq!(entries[1].action, ActionKind::Create);
    }

    #[test]
    fn test_untracked_change_writes_no_entry() {
        let (mut registry, _) = registry();
        let key = registry.create_member(Member::new("Ali", "", dob())).unwrap().key.unwrap();

        registry
            .update_member_with(key, |m| m.phone = Some("9876543210".to_string()))
            .unwrap();

        assert_eq!(entries_for(&registry, EntityClass::Member).len(), 1);
    }

    #[test]
    fn test_guardian_change_is_flagged() {
        let (mut registry, _) = registry();
        let key = registry.create_member(Member::new("Ali", "", dob())).unwrap().key.unwrap();

        registry.update_member_with(key, |m| m.is_guardian = true).unwrap();

        let entries = entries_for(&registry, EntityClass::Member);
        assert_eq!(entries[0].description, "Member updated: Ali (Guardian Status Changed)");
        assert_eq!(entries[0].fields_changed["is_guardian"].new.as_deref(), Some("true"));
    }

    #[test]
    fn test_member_id_is_immutable() {
        let (mut registry, _) = registry();
        let key = registry.create_member(Member::new("Ali", "", dob())).unwrap().key.unwrap();

        let updated = registry
            .update_member_with(key, |m| m.member_id = "5555".to_string())
            .unwrap();
        assert_eq!(updated.member_id, "1001");
    }

    #[test]
    fn test_moving_house_is_diffed_by_home_id() {
        let (mut registry, area) = registry();
        let first = registry.create_house(House::new("A", "F", area)).unwrap();
        let second = registry.create_house(House::new("B", "F", area)).unwrap();

        let mut member = Member::new("Ali", "", dob());
        member.house = first.key;
        let key = registry.create_member(member).unwrap().key.unwrap();
        registry.update_member_with(key, |m| m.house = second.key).unwrap();

        let entries = entries_for(&registry, EntityClass::Member);
        let change = &entries[0].fields_changed["house"];
        assert_eq!(change.old.as_deref(), Some("1001"));
        assert_eq!(change.new.as_deref(), Some("1002"));
    }

    #[test]
    fn test_delete_house_records_delete_entry() {
        let (mut registry, area) = registry();
        let house = registry.create_house(House::new("TestHouse", "TestFamily", area)).unwrap();

        registry.delete_house(house.key.unwrap()).unwrap();

        let entries = entries_for(&registry, EntityClass::House);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, ActionKind::Delete);
        assert_eq!(entries[0].object_id, "1001");
        assert_eq!(entries[0].description, "House deleted: TestHouse");
        assert!(registry.house(house.key.unwrap()).is_err());
    }

    #[test]
    fn test_spouse_link_is_made_symmetric_once() {
        let (mut registry, _) = registry();
        let rashid = registry.create_member(Member::new("Rashid", "P", dob())).unwrap();

        let mut aysha = Member::new("Aysha", "", dob());
        aysha.spouse = Relation::linked(rashid.key.unwrap());
        let aysha = registry.create_member(aysha).unwrap();

        let rashid = registry.member(rashid.key.unwrap()).unwrap();
        assert!(rashid.spouse.points_to(aysha.key.unwrap()));
        assert_eq!(rashid.spouse.known_as(), &PersonName::new("Aysha", ""));
        assert_eq!(aysha.spouse.known_as(), &PersonName::new("Rashid", "P"));

        // re-saving either side changes nothing and logs nothing
        registry.update_member(aysha.clone()).unwrap();
        registry.update_member(rashid).unwrap();
        registry.set_spouse(aysha.key.unwrap(), aysha.spouse.key().unwrap()).unwrap();

        let entries = entries_for(&registry, EntityClass::Member);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.action == ActionKind::Create));
    }

    #[test]
    fn test_clearing_spouse_is_one_directional() {
        let (mut registry, _) = registry();
        let a = registry.create_member(Member::new("Rashid", "", dob())).unwrap().key.unwrap();
        let b = registry.create_member(Member::new("Aysha", "", dob())).unwrap().key.unwrap();
        registry.set_spouse(a, b).unwrap();

        registry.update_member_with(a, |m| m.spouse = Relation::none()).unwrap();

        assert!(registry.member(a).unwrap().spouse.is_none());
        assert!(registry.member(b).unwrap().spouse.points_to(a));
    }

    #[test]
    fn test_legacy_dangling_spouse_does_not_block_edit() {
        let (mut registry, _) = registry();
        let mut legacy = Member::new("Rashid", "", dob());
        legacy.member_id = "1001".to_string();
        legacy.spouse = Relation::Linked {
            key: 404,
            known_as: PersonName::new("Aysha", ""),
        };
        let key = db::insert_member(registry.connection(), &legacy).unwrap();

        let updated = registry
            .update_member_with(key, |m| m.name = "Rasheed".to_string())
            .unwrap();

        assert_eq!(updated.name, "Rasheed");
        assert!(updated.spouse.points_to(404));
        assert_eq!(entries_for(&registry, EntityClass::Member).len(), 1);
    }

    #[test]
    fn test_changed_spouse_link_to_missing_member_is_rejected() {
        let (mut registry, _) = registry();
        let key = registry.create_member(Member::new("Rashid", "", dob())).unwrap().key.unwrap();

        let err = registry
            .update_member_with(key, |m| m.spouse = Relation::linked(404))
            .unwrap_err();

        assert!(matches!(err, RegistryError::BrokenRelationReference { key: 404, .. }));
        assert!(registry.member(key).unwrap().spouse.is_none());
    }

    #[test]
    fn test_failed_audit_write_does_not_block_save() {
        let (mut registry, _) = registry();
        let key = registry.create_member(Member::new("Ali", "", dob())).unwrap().key.unwrap();
        registry
            .connection()
            .execute_batch("DROP TABLE audit_entries")
            .unwrap();

        let updated = registry
            .update_member_with(key, |m| m.name = "Aliyu".to_string())
            .unwrap();

        assert_eq!(updated.name, "Aliyu");
        assert_eq!(registry.member(key).unwrap().name, "Aliyu");
    }

    #[test]
    fn test_family_tree_ignores_candidate_limit() {
        let mut config = RegistryConfig::default();
        config.engine.candidate_limit = 2;
        let mut registry = Registry::in_memory(config).unwrap();

        registry.create_member(Member::new("A", "", dob())).unwrap();
        registry.create_member(Member::new("B", "", dob())).unwrap();
        let father = registry.create_member(Member::new("Abdul", "", dob())).unwrap();
        let mut child = Member::new("Irfan", "", dob());
        child.father = Relation::linked(father.key.unwrap());
        let child = registry.create_member(child).unwrap();

        // both sit past the two-member candidate slice
        let tree = registry.family_tree(child.key.unwrap()).unwrap();
        assert_eq!(tree.father.as_ref().map(|m| m.name.as_str()), Some("Abdul"));

        let tree = registry.family_tree(father.key.unwrap()).unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].key, child.key);
    }

    #[test]
    fn test_concurrent_creates_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RegistryConfig::default();
        config.database.path = dir.path().join("registry.db");
        Registry::open(config.clone()).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let config = config.clone();
                thread::spawn(move || {
                    let mut registry = Registry::open(config).unwrap();
                    let mut ids = Vec::new();
                    while ids.len() < 10 {
                        let name = format!("Worker{} Member{}", worker, ids.len());
                        match registry.create_member(Member::new(&name, "", dob())) {
                            Ok(member) => ids.push(member.member_id),
                            Err(e) if e.is_retryable() => continue,
                            Err(e) => panic!("create failed: {}", e),
                        }
                    }
                    ids
                })
            })
            .collect();

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.join().unwrap());
        }

        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 40);
        assert_eq!(unique.len(), 40);

        let registry = Registry::open(config).unwrap();
        assert_eq!(db::load_members(registry.connection(), 1000).unwrap().len(), 40);
        assert_eq!(entries_for(&registry, EntityClass::Member).len(), 40);

        println!("✅ 40 concurrent creates, no duplicate member ids");
    }

    #[test]
    fn test_broken_link_on_create_rolls_back() {
        let (mut registry, _) = registry();
        let mut orphan = Member::new("Rashid", "", dob());
        orphan.father = Relation::linked(404);

        let err = registry.create_member(orphan).unwrap_err();
        assert!(matches!(err, RegistryError::BrokenRelationReference { key: 404, .. }));

        // nothing persisted, no id burned
        assert!(db::load_members(registry.connection(), 10).unwrap().is_empty());
        let next = registry.create_member(Member::new("Ali", "", dob())).unwrap();
        assert_eq!(next.member_id, "1001");
    }

    #[test]
    fn test_unknown_area_is_rejected() {
        let (mut registry, _) = registry();
        let err = registry.create_house(House::new("TestHouse", "F", 999)).unwrap_err();
        assert!(matches!(err, RegistryError::BrokenRelationReference { .. }));
    }

    #[test]
    fn test_search_tree_and_duplicates() {
        let (mut registry, area) = registry();
        registry.create_house(House::new("TestHouse", "TestFamily", area)).unwrap();

        let father = registry.create_member(Member::new("Mohammed Ali", "", dob())).unwrap();
        let mut child = Member::new("Irfan", "", dob());
        child.father = Relation::linked(father.key.unwrap());
        let child = registry.create_member(child).unwrap();
        assert_eq!(child.father.known_as().name, "Mohammed Ali");

        let hits = registry.search("Muhammed").unwrap();
        assert_eq!(hits[0].member.key, father.key);

        let tree = registry.family_tree(father.key.unwrap()).unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.members().len(), 2);

        let duplicates = registry.house_duplicates("TstHose", "TestFamily").unwrap();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].entity.home_id, "1001");
    }

    #[test]
    fn test_feed_paging_and_sync() {
        let (mut registry, area) = registry();
        for name in ["A", "B", "C"] {
            registry.create_house(House::new(name, "F", area)).unwrap();
        }

        let first = registry.recent_actions(&AuditFilter::default(), 1, 2).unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.total, 3);
        assert!(first.has_next());
        let second = registry.recent_actions(&AuditFilter::default(), 2, 2).unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(!second.has_next());

        let pending = registry.pending_sync().unwrap();
        assert_eq!(pending.len(), 3);
        let ids: Vec<String> = pending.iter().map(|e| e.entry_id.clone()).collect();
        assert_eq!(registry.mark_synced(&ids).unwrap(), 3);
        assert!(registry.pending_sync().unwrap().is_empty());
    }

    #[test]
    fn test_obligation_flow() {
        let (mut registry, area) = registry();
        let house = registry.create_house(House::new("TestHouse", "F", area)).unwrap();
        let mut member = Member::new("Ali", "", dob());
        member.house = house.key;
        let member = registry.create_member(member).unwrap();

        let collection = registry.create_collection("Eid Paisa", "").unwrap();
        let sub = registry
            .create_subcollection(SubCollection::new(
                collection,
                "2025",
                "Eid Paisa 2025",
                250.0,
                NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            ))
            .unwrap();
        let sub_key = sub.key.unwrap();

        let report = registry.assign_obligations(sub_key, &[member.key.unwrap()]).unwrap();
        registry
            .update_obligation_status(report.created[0], PaidStatus::Paid, None)
            .unwrap();

        let stats = registry.obligation_statistics(Some(sub_key)).unwrap();
        assert_eq!(stats.paid, 1);
        assert_eq!(stats.paid_amount, 250.0);
        assert_eq!(entries_for(&registry, EntityClass::Obligation).len(), 2);
    }
}
