// 📇 Relation Directory - in-memory key → record lookups for one query
//
// Search and duplicate checks load a bounded slice of members and houses
// once, then resolve father/mother/spouse/house links through this directory
// instead of going back to the store per candidate.
//
// A link whose key is not in the directory is a broken reference. Lookups
// report it as `BrokenRelationReference`; read paths call `degrade` to log it
// and carry on with the relation's stored name.

use crate::entities::{House, HouseKey, Member, MemberKey, PersonName, Relation};
use crate::error::{RegistryError, Result};
use std::collections::HashMap;
use tracing::debug;

pub struct RelationDirectory<'a> {
    members: HashMap<MemberKey, &'a Member>,
    houses: HashMap<HouseKey, &'a House>,
    /// Members in load order (search results keep this order for ties)
    ordered: Vec<&'a Member>,
}

impl<'a> RelationDirectory<'a> {
    pub fn new(members: &'a [Member], houses: &'a [House]) -> Self {
        RelationDirectory {
            members: members
                .iter()
                .filter_map(|m| m.key.map(|key| (key, m)))
                .collect(),
            houses: houses
                .iter()
                .filter_map(|h| h.key.map(|key| (key, h)))
                .collect(),
            ordered: members.iter().collect(),
        }
    }

    pub fn members(&self) -> &[&'a Member] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn member(&self, key: MemberKey) -> Result<&'a Member> {
        self.members
            .get(&key)
            .copied()
            .ok_or_else(|| RegistryError::broken("member", key))
    }

    /// Follow a relation. Unlinked → `Ok(None)`; dangling link → error.
    pub fn resolve(&self, role: &str, relation: &Relation) -> Result<Option<&'a Member>> {
        match relation.key() {
            Some(key) => self
                .members
                .get(&key)
                .copied()
                .map(Some)
                .ok_or_else(|| RegistryError::broken(role, key)),
            None => Ok(None),
        }
    }

    pub fn house_of(&self, member: &Member) -> Result<Option<&'a House>> {
        match member.house {
            Some(key) => self
                .houses
                .get(&key)
                .copied()
                .map(Some)
                .ok_or_else(|| RegistryError::broken("house", key)),
            None => Ok(None),
        }
    }

    /// Turn a lookup failure into absence, logging which record it came from
    pub fn degrade<T>(&self, result: Result<Option<T>>, context: &str) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(e) => {
                debug!(context, error = %e, "Relation lookup degraded to absence");
                None
            }
        }
    }

    /// Name to show for a relation: the linked member's current name, or the
    /// name stored with the relation when unlinked or broken
    pub fn relation_name(&self, role: &str, relation: &Relation) -> PersonName {
        match self.degrade(self.resolve(role, relation), role) {
            Some(member) => member.person_name(),
            None => relation.known_as().clone(),
        }
    }

    /// House name of a member, empty when it has none or the link is broken
    pub fn house_name(&self, member: &Member) -> &'a str {
        self.degrade(self.house_of(member), "house")
            .map(|h| h.house_name.as_str())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn member(key: MemberKey, name: &str) -> Member {
        let mut member = Member::new(name, "", NaiveDate::from_ymd_opt(1980, 1, 1).unwrap());
        member.key = Some(key);
        member.member_id = (1000 + key).to_string();
        member
    }

    #[test]
    fn test_resolve_linked_and_unlinked() {
        let members = vec![member(1, "Abdul"), member(2, "Rashid")];
        let directory = RelationDirectory::new(&members, &[]);

        let found = directory.resolve("father", &Relation::linked(1)).unwrap();
        assert_eq!(found.map(|m| m.name.as_str()), Some("Abdul"));
        assert!(directory
            .resolve("father", &Relation::unlinked("Abdul", ""))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_broken_link_is_reported_then_degraded() {
        let members = vec![member(1, "Abdul")];
        let directory = RelationDirectory::new(&members, &[]);
        let broken = Relation::Linked {
            key: 99,
            known_as: PersonName::new("Kareem", "P"),
        };

        let err = directory.resolve("father", &broken).unwrap_err();
        assert!(matches!(err, RegistryError::BrokenRelationReference { key: 99, .. }));

        assert_eq!(directory.relation_name("father", &broken).full(), "Kareem P");
    }

    #[test]
    fn test_relation_name_prefers_live_record() {
        let members = vec![member(1, "Abdul Kareem")];
        let directory = RelationDirectory::new(&members, &[]);
        let stale = Relation::Linked {
            key: 1,
            known_as: PersonName::new("Abdul", ""),
        };

        assert_eq!(directory.relation_name("father", &stale).name, "Abdul Kareem");
    }

    #[test]
    fn test_house_name_of_broken_house_is_empty() {
        let mut house = House::new("TestHouse", "Family", 1);
        house.key = Some(7);
        let houses = vec![house];

        let mut resident = member(1, "Ali");
        resident.house = Some(7);
        let mut lost = member(2, "Ibrahim");
        lost.house = Some(8);
        let members = vec![resident, lost];

        let directory = RelationDirectory::new(&members, &houses);
        assert_eq!(directory.house_name(&members[0]), "TestHouse");
        assert_eq!(directory.house_name(&members[1]), "");
    }
}
