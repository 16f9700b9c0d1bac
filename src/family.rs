// 🌳 Family Graph Resolver - family trees and reciprocal spouse links
//
// Parent links are one-way (child → parent); children and siblings are found
// by querying for members whose links point back. The spouse link is the
// only symmetric relation, so setting it also repairs the other side.

use crate::db;
use crate::entities::{Member, MemberKey, PersonName, Relation};
use crate::error::{RegistryError, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

// ============================================================================
// FAMILY TREE
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct FamilyTree {
    pub member: Member,
    pub father: Option<Member>,
    pub mother: Option<Member>,
    pub spouse: Option<Member>,
    pub children: Vec<Member>,
    pub siblings: Vec<Member>,
}

impl FamilyTree {
    /// Everyone in the tree, the member itself first, each key once
    pub fn members(&self) -> Vec<&Member> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        let others = self
            .father
            .iter()
            .chain(self.mother.iter())
            .chain(self.spouse.iter())
            .chain(self.children.iter())
            .chain(self.siblings.iter());

        for member in std::iter::once(&self.member).chain(others) {
            let fresh = match member.key {
                Some(key) => seen.insert(key),
                None => true,
            };
            if fresh {
                out.push(member);
            }
        }
        out
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Target of a link, or None when unlinked or dangling
fn linked(conn: &Connection, role: &str, relation: &Relation) -> Result<Option<Member>> {
    let key = match relation.key() {
        Some(key) => key,
        None => return Ok(None),
    };
    let target = db::get_member(conn, key)?;
    if target.is_none() {
        debug!(relation = role, key, "Broken relation reference treated as absent");
    }
    Ok(target)
}

pub struct FamilyGraphResolver;

impl FamilyGraphResolver {
    pub fn new() -> Self {
        FamilyGraphResolver
    }

    /// Immediate family of `member`, read from the store. Broken
    /// parent/spouse links are absent.
    pub fn family_tree(&self, conn: &Connection, member: &Member) -> Result<FamilyTree> {
        let father = linked(conn, "father", &member.father)?;
        let mother = linked(conn, "mother", &member.mother)?;
        let spouse = linked(conn, "spouse", &member.spouse)?;

        let children = match member.key {
            Some(key) => db::children_of(conn, key)?,
            None => Vec::new(),
        };
        let siblings = db::siblings_of(conn, member.father.key(), member.mother.key(), member.key)?;

        debug!(
            member = %member.member_id,
            children = children.len(),
            siblings = siblings.len(),
            "Family tree resolved"
        );

        Ok(FamilyTree {
            member: member.clone(),
            father,
            mother,
            spouse,
            children,
            siblings,
        })
    }

    /// Link `member_key` to `spouse_key` and make the spouse point back.
    ///
    /// Runs on the caller's connection/transaction. Returns true when the
    /// reciprocal link had to be written.
    pub fn set_spouse(&self, conn: &Connection, member_key: MemberKey, spouse_key: MemberKey) -> Result<bool> {
        if member_key == spouse_key {
            return Err(RegistryError::Validation(
                "spouse: A member cannot be their own spouse".to_string(),
            ));
        }

        let member = db::get_member(conn, member_key)?
            .ok_or_else(|| RegistryError::NotFound(format!("member {}", member_key)))?;
        let spouse = db::get_member(conn, spouse_key)?
            .ok_or_else(|| RegistryError::broken("spouse", spouse_key))?;

        if !member.spouse.points_to(spouse_key) {
            let link = Relation::Linked {
                key: spouse_key,
                known_as: spouse.person_name(),
            };
            db::update_spouse_link(conn, member_key, &link)?;
        }

        self.repair_reciprocal(conn, member_key, &member.person_name(), spouse_key)
    }

    /// Make `spouse_key` point back at `member_key`. A spouse that already
    /// points back is left untouched; blank stored names are filled from
    /// `member_name`.
    pub fn repair_reciprocal(
        &self,
        conn: &Connection,
        member_key: MemberKey,
        member_name: &PersonName,
        spouse_key: MemberKey,
    ) -> Result<bool> {
        let spouse = db::get_member(conn, spouse_key)?
            .ok_or_else(|| RegistryError::broken("spouse", spouse_key))?;

        if spouse.spouse.points_to(member_key) {
            return Ok(false);
        }

        let current = spouse.spouse.known_as();
        let known_as = PersonName {
            name: if current.name.trim().is_empty() {
                member_name.name.clone()
            } else {
                current.name.clone()
            },
            surname: if current.surname.trim().is_empty() {
                member_name.surname.clone()
            } else {
                current.surname.clone()
            },
        };

        db::update_spouse_link(
            conn,
            spouse_key,
            &Relation::Linked {
                key: member_key,
                known_as,
            },
        )?;

        info!(member = member_key, spouse = spouse_key, "Reciprocal spouse link written");
        Ok(true)
    }
}

impl Default for FamilyGraphResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
