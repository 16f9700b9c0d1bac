use crate::audit::{ActionKind, AuditEntry, AuditFilter, FieldChange};
use crate::config::DatabaseConfig;
use crate::entities::{
    Area, AreaKey, Collection, CollectionKey, EntityClass, Gender, House, HouseKey, Member,
    MemberKey, MemberObligation, MemberStatus, ObligationKey, PaidStatus, Relation, SubCollection,
    SubCollectionKey,
};
use crate::error::{RegistryError, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Open (or create) the database file and apply the schema
pub fn open_database(config: &DatabaseConfig) -> Result<Connection> {
    let conn = Connection::open(&config.path)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    setup_database(&conn)?;
    info!(path = %config.path.display(), "Registry database opened");
    Ok(conn)
}

/// In-memory database with the full schema (tests, dry runs)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases stay in "memory")
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS areas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS houses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            home_id TEXT UNIQUE NOT NULL,
            house_name TEXT NOT NULL,
            family_name TEXT NOT NULL,
            location_name TEXT NOT NULL DEFAULT '',
            area_id INTEGER NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- father/mother/spouse/house ids are not declared as foreign keys:
        -- legacy rows may hold dangling references and must still load
        CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            surname TEXT NOT NULL DEFAULT '',
            house_id INTEGER,
            adhar TEXT,
            gender TEXT,
            status TEXT NOT NULL DEFAULT 'live',
            date_of_birth TEXT NOT NULL,
            date_of_death TEXT,
            father_id INTEGER,
            father_name TEXT NOT NULL DEFAULT '',
            father_surname TEXT NOT NULL DEFAULT '',
            mother_id INTEGER,
            mother_name TEXT NOT NULL DEFAULT '',
            mother_surname TEXT NOT NULL DEFAULT '',
            spouse_id INTEGER,
            spouse_name TEXT NOT NULL DEFAULT '',
            spouse_surname TEXT NOT NULL DEFAULT '',
            general_body_member INTEGER NOT NULL DEFAULT 0,
            is_guardian INTEGER NOT NULL DEFAULT 0,
            phone TEXT,
            whatsapp TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS subcollections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
            year TEXT NOT NULL,
            name TEXT NOT NULL,
            amount REAL NOT NULL DEFAULT 0,
            due_date TEXT NOT NULL,
            UNIQUE (collection_id, year, name)
        );

        CREATE TABLE IF NOT EXISTS member_obligations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subcollection_id INTEGER NOT NULL,
            member_id INTEGER NOT NULL,
            area_id INTEGER,
            amount REAL NOT NULL,
            paid_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (subcollection_id, member_id)
        );

        -- Last issued display identifier per entity class
        CREATE TABLE IF NOT EXISTS id_sequences (
            entity_class TEXT PRIMARY KEY,
            last_value INTEGER NOT NULL
        );

        -- Audit trail (append-only apart from the sync flag)
        CREATE TABLE IF NOT EXISTS audit_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id TEXT UNIQUE NOT NULL,
            entity_class TEXT NOT NULL,
            object_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            description TEXT NOT NULL,
            fields_changed TEXT NOT NULL,
            is_sync_pending INTEGER NOT NULL DEFAULT 1,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_houses_area ON houses(area_id);
        CREATE INDEX IF NOT EXISTS idx_members_house ON members(house_id);
        CREATE INDEX IF NOT EXISTS idx_members_status ON members(status);
        CREATE INDEX IF NOT EXISTS idx_members_father ON members(father_id);
        CREATE INDEX IF NOT EXISTS idx_members_mother ON members(mother_id);
        CREATE INDEX IF NOT EXISTS idx_obligations_status ON member_obligations(subcollection_id, paid_status);
        CREATE INDEX IF NOT EXISTS idx_audit_object ON audit_entries(entity_class, object_id);
        CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);
        CREATE INDEX IF NOT EXISTS idx_audit_pending ON audit_entries(is_sync_pending);",
    )?;

    Ok(())
}

/// SQLITE_BUSY / SQLITE_LOCKED: another connection holds the write lock
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

// ============================================================================
// Column helpers
// ============================================================================

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_date(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, format!("invalid date '{}': {}", value, e)))
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn relation_columns(relation: &Relation) -> (Option<MemberKey>, &str, &str) {
    let known_as = relation.known_as();
    (relation.key(), known_as.name.as_str(), known_as.surname.as_str())
}

// ============================================================================
// Areas
// ============================================================================

pub fn insert_area(conn: &Connection, area: &Area) -> Result<AreaKey> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO areas (name, description, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![area.name, area.description, now],
    )?;
    Ok(conn.last_insert_rowid())
}

fn area_from_row(row: &Row) -> rusqlite::Result<Area> {
    Ok(Area {
        key: Some(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

pub fn get_area(conn: &Connection, key: AreaKey) -> Result<Option<Area>> {
    let area = conn
        .query_row(
            "SELECT id, name, description FROM areas WHERE id = ?1",
            [key],
            area_from_row,
        )
        .optional()?;
    Ok(area)
}

pub fn get_area_by_name(conn: &Connection, name: &str) -> Result<Option<Area>> {
    let area = conn
        .query_row(
            "SELECT id, name, description FROM areas WHERE name = ?1 COLLATE NOCASE",
            [name.trim()],
            area_from_row,
        )
        .optional()?;
    Ok(area)
}

// ============================================================================
// Houses
// ============================================================================

const HOUSE_COLUMNS: &str = "id, home_id, house_name, family_name, location_name, area_id, address, created_at, updated_at";

fn house_from_row(row: &Row) -> rusqlite::Result<House> {
    Ok(House {
        key: Some(row.get(0)?),
        home_id: row.get(1)?,
        house_name: row.get(2)?,
        family_name: row.get(3)?,
        location_name: row.get(4)?,
        area: row.get(5)?,
        address: row.get(6)?,
        created_at: parse_timestamp(row.get(7)?),
        updated_at: parse_timestamp(row.get(8)?),
    })
}

pub fn insert_house(conn: &Connection, house: &House) -> Result<HouseKey> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO houses (
            home_id, house_name, family_name, location_name, area_id, address, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            house.home_id,
            house.house_name,
            house.family_name,
            house.location_name,
            house.area,
            house.address,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_house(conn: &Connection, house: &House) -> Result<()> {
    let key = house
        .key
        .ok_or_else(|| RegistryError::NotFound("house without key".to_string()))?;
    let updated = conn.execute(
        "UPDATE houses
         SET house_name = ?1, family_name = ?2, location_name = ?3, area_id = ?4,
             address = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            house.house_name,
            house.family_name,
            house.location_name,
            house.area,
            house.address,
            Utc::now().to_rfc3339(),
            key,
        ],
    )?;
    if updated == 0 {
        return Err(RegistryError::NotFound(format!("house {}", key)));
    }
    Ok(())
}

/// Delete a house; members living in it keep their row with no house
pub fn delete_house(conn: &Connection, key: HouseKey) -> Result<bool> {
    conn.execute(
        "UPDATE members SET house_id = NULL WHERE house_id = ?1",
        [key],
    )?;
    let deleted = conn.execute("DELETE FROM houses WHERE id = ?1", [key])?;
    Ok(deleted > 0)
}

pub fn get_house(conn: &Connection, key: HouseKey) -> Result<Option<House>> {
    let sql = format!("SELECT {} FROM houses WHERE id = ?1", HOUSE_COLUMNS);
    Ok(conn.query_row(&sql, [key], house_from_row).optional()?)
}

pub fn get_house_by_home_id(conn: &Connection, home_id: &str) -> Result<Option<House>> {
    let sql = format!("SELECT {} FROM houses WHERE home_id = ?1", HOUSE_COLUMNS);
    Ok(conn.query_row(&sql, [home_id.trim()], house_from_row).optional()?)
}

/// Houses in display-id order, at most `limit` rows
pub fn load_houses(conn: &Connection, limit: usize) -> Result<Vec<House>> {
    let sql = format!(
        "SELECT {} FROM houses ORDER BY CAST(home_id AS INTEGER), id LIMIT ?1",
        HOUSE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let houses = stmt
        .query_map([limit as i64], house_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(houses)
}

// ============================================================================
// Members
// ============================================================================

const MEMBER_COLUMNS: &str = "id, member_id, name, surname, house_id, adhar, gender, status,
    date_of_birth, date_of_death,
    father_id, father_name, father_surname,
    mother_id, mother_name, mother_surname,
    spouse_id, spouse_name, spouse_surname,
    general_body_member, is_guardian, phone, whatsapp, created_at, updated_at";

fn member_from_row(row: &Row) -> rusqlite::Result<Member> {
    let gender: Option<String> = row.get(6)?;
    let status: String = row.get(7)?;
    let date_of_birth: String = row.get(8)?;
    let date_of_death: Option<String> = row.get(9)?;

    Ok(Member {
        key: Some(row.get(0)?),
        member_id: row.get(1)?,
        name: row.get(2)?,
        surname: row.get(3)?,
        house: row.get(4)?,
        adhar: row.get(5)?,
        gender: gender.as_deref().and_then(Gender::parse),
        status: MemberStatus::parse(&status).unwrap_or_default(),
        date_of_birth: parse_date(8, &date_of_birth)?,
        date_of_death: date_of_death
            .as_deref()
            .map(|d| parse_date(9, d))
            .transpose()?,
        father: Relation::from_parts(row.get(10)?, row.get(11)?, row.get(12)?),
        mother: Relation::from_parts(row.get(13)?, row.get(14)?, row.get(15)?),
        spouse: Relation::from_parts(row.get(16)?, row.get(17)?, row.get(18)?),
        general_body_member: row.get(19)?,
        is_guardian: row.get(20)?,
        phone: row.get(21)?,
        whatsapp: row.get(22)?,
        created_at: parse_timestamp(row.get(23)?),
        updated_at: parse_timestamp(row.get(24)?),
    })
}

pub fn insert_member(conn: &Connection, member: &Member) -> Result<MemberKey> {
    let now = Utc::now().to_rfc3339();
    let (father_id, father_name, father_surname) = relation_columns(&member.father);
    let (mother_id, mother_name, mother_surname) = relation_columns(&member.mother);
    let (spouse_id, spouse_name, spouse_surname) = relation_columns(&member.spouse);

    conn.execute(
        "INSERT INTO members (
            member_id, name, surname, house_id, adhar, gender, status,
            date_of_birth, date_of_death,
            father_id, father_name, father_surname,
            mother_id, mother_name, mother_surname,
            spouse_id, spouse_name, spouse_surname,
            general_body_member, is_guardian, phone, whatsapp, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?23)",
        params![
            member.member_id,
            member.name,
            member.surname,
            member.house,
            member.adhar,
            member.gender.map(|g| g.as_str()),
            member.status.as_str(),
            format_date(member.date_of_birth),
            member.date_of_death.map(format_date),
            father_id,
            father_name,
            father_surname,
            mother_id,
            mother_name,
            mother_surname,
            spouse_id,
            spouse_name,
            spouse_surname,
            member.general_body_member,
            member.is_guardian,
            member.phone,
            member.whatsapp,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Full update of every mutable column (member_id is never rewritten)
pub fn update_member(conn: &Connection, member: &Member) -> Result<()> {
    let key = member
        .key
        .ok_or_else(|| RegistryError::NotFound("member without key".to_string()))?;
    let (father_id, father_name, father_surname) = relation_columns(&member.father);
    let (mother_id, mother_name, mother_surname) = relation_columns(&member.mother);
    let (spouse_id, spouse_name, spouse_surname) = relation_columns(&member.spouse);

    let updated = conn.execute(
        "UPDATE members SET
            name = ?1, surname = ?2, house_id = ?3, adhar = ?4, gender = ?5, status = ?6,
            date_of_birth = ?7, date_of_death = ?8,
            father_id = ?9, father_name = ?10, father_surname = ?11,
            mother_id = ?12, mother_name = ?13, mother_surname = ?14,
            spouse_id = ?15, spouse_name = ?16, spouse_surname = ?17,
            general_body_member = ?18, is_guardian = ?19, phone = ?20, whatsapp = ?21,
            updated_at = ?22
         WHERE id = ?23",
        params![
            member.name,
            member.surname,
            member.house,
            member.adhar,
            member.gender.map(|g| g.as_str()),
            member.status.as_str(),
            format_date(member.date_of_birth),
            member.date_of_death.map(format_date),
            father_id,
            father_name,
            father_surname,
            mother_id,
            mother_name,
            mother_surname,
            spouse_id,
            spouse_name,
            spouse_surname,
            member.general_body_member,
            member.is_guardian,
            member.phone,
            member.whatsapp,
            Utc::now().to_rfc3339(),
            key,
        ],
    )?;
    if updated == 0 {
        return Err(RegistryError::NotFound(format!("member {}", key)));
    }
    Ok(())
}

/// Write only the spouse columns of one member
pub fn update_spouse_link(conn: &Connection, key: MemberKey, spouse: &Relation) -> Result<()> {
    let (spouse_id, spouse_name, spouse_surname) = relation_columns(spouse);
    let updated = conn.execute(
        "UPDATE members SET spouse_id = ?1, spouse_name = ?2, spouse_surname = ?3, updated_at = ?4
         WHERE id = ?5",
        params![spouse_id, spouse_name, spouse_surname, Utc::now().to_rfc3339(), key],
    )?;
    if updated == 0 {
        return Err(RegistryError::NotFound(format!("member {}", key)));
    }
    Ok(())
}

/// Delete a member. Links pointing at it are cleared (their stored names
/// stay, so they fall back to unlinked relations); obligations go with it.
pub fn delete_member(conn: &Connection, key: MemberKey) -> Result<bool> {
    for column in ["father_id", "mother_id", "spouse_id"] {
        conn.execute(
            &format!("UPDATE members SET {col} = NULL WHERE {col} = ?1", col = column),
            [key],
        )?;
    }
    conn.execute("DELETE FROM member_obligations WHERE member_id = ?1", [key])?;
    let deleted = conn.execute("DELETE FROM members WHERE id = ?1", [key])?;
    Ok(deleted > 0)
}

pub fn get_member(conn: &Connection, key: MemberKey) -> Result<Option<Member>> {
    let sql = format!("SELECT {} FROM members WHERE id = ?1", MEMBER_COLUMNS);
    Ok(conn.query_row(&sql, [key], member_from_row).optional()?)
}

pub fn get_member_by_member_id(conn: &Connection, member_id: &str) -> Result<Option<Member>> {
    let sql = format!("SELECT {} FROM members WHERE member_id = ?1", MEMBER_COLUMNS);
    Ok(conn
        .query_row(&sql, [member_id.trim()], member_from_row)
        .optional()?)
}

/// Members in display-id order, at most `limit` rows
pub fn load_members(conn: &Connection, limit: usize) -> Result<Vec<Member>> {
    let sql = format!(
        "SELECT {} FROM members ORDER BY CAST(member_id AS INTEGER), id LIMIT ?1",
        MEMBER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let members = stmt
        .query_map([limit as i64], member_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(members)
}

/// Members whose father or mother link points at `parent`
pub fn children_of(conn: &Connection, parent: MemberKey) -> Result<Vec<Member>> {
    let sql = format!(
        "SELECT {} FROM members WHERE father_id = ?1 OR mother_id = ?1
         ORDER BY CAST(member_id AS INTEGER), id",
        MEMBER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let children = stmt
        .query_map([parent], member_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(children)
}

/// Members sharing the given father or mother, `except` left out.
/// Empty when neither parent is known.
pub fn siblings_of(
    conn: &Connection,
    father: Option<MemberKey>,
    mother: Option<MemberKey>,
    except: Option<MemberKey>,
) -> Result<Vec<Member>> {
    if father.is_none() && mother.is_none() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM members
         WHERE (father_id = ?1 OR mother_id = ?2) AND (?3 IS NULL OR id != ?3)
         ORDER BY CAST(member_id AS INTEGER), id",
        MEMBER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let siblings = stmt
        .query_map(params![father, mother, except], member_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(siblings)
}

// ============================================================================
// Display identifiers
// ============================================================================

/// Highest numeric display identifier stored for a class
///
/// Compared numerically: "10000" must beat "9999".
pub fn max_display_id(conn: &Connection, class: EntityClass) -> Result<Option<String>> {
    let (table, column) = match class.identifier_column() {
        Some(tc) => tc,
        None => return Ok(None),
    };
    let sql = format!(
        "SELECT MAX(CAST({col} AS INTEGER)) FROM {table} WHERE {col} GLOB '[0-9]*'",
        col = column,
        table = table
    );
    let max: Option<i64> = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(max.map(|v| v.to_string()))
}

pub fn get_sequence_value(conn: &Connection, class: EntityClass) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT last_value FROM id_sequences WHERE entity_class = ?1",
            [class.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn set_sequence_value(conn: &Connection, class: EntityClass, value: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO id_sequences (entity_class, last_value) VALUES (?1, ?2)
         ON CONFLICT(entity_class) DO UPDATE SET last_value = excluded.last_value",
        params![class.as_str(), value],
    )?;
    Ok(())
}

// ============================================================================
// Collections & obligations
// ============================================================================

pub fn insert_collection(conn: &Connection, collection: &Collection) -> Result<CollectionKey> {
    conn.execute(
        "INSERT INTO collections (name, description) VALUES (?1, ?2)",
        params![collection.name, collection.description],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_subcollection(conn: &Connection, sub: &SubCollection) -> Result<SubCollectionKey> {
    conn.execute(
        "INSERT INTO subcollections (collection_id, year, name, amount, due_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![sub.collection, sub.year, sub.name, sub.amount, format_date(sub.due_date)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_subcollection(conn: &Connection, key: SubCollectionKey) -> Result<Option<SubCollection>> {
    let sub = conn
        .query_row(
            "SELECT id, collection_id, year, name, amount, due_date FROM subcollections WHERE id = ?1",
            [key],
            |row| {
                let due: String = row.get(5)?;
                Ok(SubCollection {
                    key: Some(row.get(0)?),
                    collection: row.get(1)?,
                    year: row.get(2)?,
                    name: row.get(3)?,
                    amount: row.get(4)?,
                    due_date: parse_date(5, &due)?,
                })
            },
        )
        .optional()?;
    Ok(sub)
}

const OBLIGATION_COLUMNS: &str =
    "id, subcollection_id, member_id, area_id, amount, paid_status, created_at, updated_at";

fn obligation_from_row(row: &Row) -> rusqlite::Result<MemberObligation> {
    let status: String = row.get(5)?;
    Ok(MemberObligation {
        key: Some(row.get(0)?),
        subcollection: row.get(1)?,
        member: row.get(2)?,
        area: row.get(3)?,
        amount: row.get(4)?,
        paid_status: PaidStatus::parse(&status)
            .ok_or_else(|| conversion_error(5, format!("unknown paid_status '{}'", status)))?,
        created_at: parse_timestamp(row.get(6)?),
        updated_at: parse_timestamp(row.get(7)?),
    })
}

pub fn insert_obligation(conn: &Connection, obligation: &MemberObligation) -> Result<ObligationKey> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO member_obligations (
            subcollection_id, member_id, area_id, amount, paid_status, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            obligation.subcollection,
            obligation.member,
            obligation.area,
            obligation.amount,
            obligation.paid_status.as_str(),
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_obligation(conn: &Connection, obligation: &MemberObligation) -> Result<()> {
    let key = obligation
        .key
        .ok_or_else(|| RegistryError::NotFound("obligation without key".to_string()))?;
    let updated = conn.execute(
        "UPDATE member_obligations SET amount = ?1, paid_status = ?2, area_id = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            obligation.amount,
            obligation.paid_status.as_str(),
            obligation.area,
            Utc::now().to_rfc3339(),
            key,
        ],
    )?;
    if updated == 0 {
        return Err(RegistryError::NotFound(format!("obligation {}", key)));
    }
    Ok(())
}

pub fn get_obligation(conn: &Connection, key: ObligationKey) -> Result<Option<MemberObligation>> {
    let sql = format!("SELECT {} FROM member_obligations WHERE id = ?1", OBLIGATION_COLUMNS);
    Ok(conn.query_row(&sql, [key], obligation_from_row).optional()?)
}

pub fn obligations_for_subcollection(
    conn: &Connection,
    subcollection: SubCollectionKey,
) -> Result<Vec<MemberObligation>> {
    let sql = format!(
        "SELECT {} FROM member_obligations WHERE subcollection_id = ?1 ORDER BY id",
        OBLIGATION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let obligations = stmt
        .query_map([subcollection], obligation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(obligations)
}

// ============================================================================
// Audit entries
// ============================================================================

pub fn insert_audit_entry(conn: &Connection, entry: &AuditEntry) -> Result<()> {
    let fields_json = serde_json::to_string(&entry.fields_changed)?;

    conn.execute(
        "INSERT INTO audit_entries (
            entry_id, entity_class, object_id, action_type, description,
            fields_changed, is_sync_pending, timestamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.entry_id,
            entry.entity_class.as_str(),
            entry.object_id,
            entry.action.as_str(),
            entry.description,
            fields_json,
            entry.is_sync_pending,
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        ],
    )?;

    Ok(())
}

const AUDIT_COLUMNS: &str = "entry_id, entity_class, object_id, action_type, description,
    fields_changed, is_sync_pending, timestamp";

fn audit_entry_from_row(row: &Row) -> rusqlite::Result<AuditEntry> {
    let class: String = row.get(1)?;
    let action: String = row.get(3)?;
    let fields_json: String = row.get(5)?;
    let timestamp: String = row.get(7)?;

    let fields_changed: BTreeMap<String, FieldChange> = serde_json::from_str(&fields_json)
        .map_err(|e| conversion_error(5, format!("invalid fields_changed: {}", e)))?;

    Ok(AuditEntry {
        entry_id: row.get(0)?,
        entity_class: EntityClass::parse(&class)
            .ok_or_else(|| conversion_error(1, format!("unknown entity class '{}'", class)))?,
        object_id: row.get(2)?,
        action: ActionKind::parse(&action)
            .ok_or_else(|| conversion_error(3, format!("unknown action '{}'", action)))?,
        description: row.get(4)?,
        fields_changed,
        is_sync_pending: row.get(6)?,
        timestamp: parse_timestamp(Some(timestamp))
            .ok_or_else(|| conversion_error(7, "invalid timestamp".to_string()))?,
    })
}

/// Filtered audit feed, newest first (timestamps are fixed-width, so text order is time order). Returns (page rows, total matching rows).
pub fn list_audit_entries(
    conn: &Connection,
    filter: &AuditFilter,
    limit: usize,
    offset: usize,
) -> Result<(Vec<AuditEntry>, usize)> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(class) = filter.entity_class {
        clauses.push("entity_class = ?");
        values.push(Value::Text(class.as_str().to_string()));
    }
    if let Some(action) = filter.action {
        clauses.push("action_type = ?");
        values.push(Value::Text(action.as_str().to_string()));
    }
    if let Some(pending) = filter.pending {
        clauses.push("is_sync_pending = ?");
        values.push(Value::Integer(pending as i64));
    }
    if let Some(object_id) = &filter.object_id {
        clauses.push("object_id = ?");
        values.push(Value::Text(object_id.clone()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM audit_entries {}", where_sql),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {} FROM audit_entries {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
        AUDIT_COLUMNS, where_sql
    );
    values.push(Value::Integer(limit as i64));
    values.push(Value::Integer(offset as i64));

    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params_from_iter(values.iter()), audit_entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok((entries, total as usize))
}

/// Oldest pending entries first, so the remote store replays them in order
pub fn pending_sync_entries(conn: &Connection, limit: usize) -> Result<Vec<AuditEntry>> {
    let sql = format!(
        "SELECT {} FROM audit_entries WHERE is_sync_pending = 1 ORDER BY timestamp ASC, id ASC LIMIT ?1",
        AUDIT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map([limit as i64], audit_entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Clear the pending flag on the given entries; returns how many flipped
pub fn mark_synced(conn: &Connection, entry_ids: &[String]) -> Result<usize> {
    let mut flipped = 0;
    for entry_id in entry_ids {
        flipped += conn.execute(
            "UPDATE audit_entries SET is_sync_pending = 0 WHERE entry_id = ?1 AND is_sync_pending = 1",
            [entry_id],
        )?;
    }
    Ok(flipped)
}
