// Entity Models
//
// Each persisted entity has:
// - A surrogate row key used by relations
// - (House, Member) a sequential display identifier people actually read
// - Plain values validated before they reach the store

pub mod house;
pub mod member;
pub mod obligation;

pub use house::{Area, AreaKey, House, HouseKey};
pub use member::{Gender, Member, MemberKey, MemberStatus, PersonName, Relation};
pub use obligation::{
    Collection, CollectionKey, MemberObligation, ObligationKey, PaidStatus, SubCollection,
    SubCollectionKey,
};

use serde::{Deserialize, Serialize};

/// Entity classes that carry display identifiers or audit history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    House,
    Member,
    Obligation,
}

impl EntityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::House => "House",
            EntityClass::Member => "Member",
            EntityClass::Obligation => "Obligation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "house" => Some(EntityClass::House),
            "member" => Some(EntityClass::Member),
            "obligation" => Some(EntityClass::Obligation),
            _ => None,
        }
    }

    /// (table, display identifier column) for classes with sequential ids
    pub fn identifier_column(&self) -> Option<(&'static str, &'static str)> {
        match self {
            EntityClass::House => Some(("houses", "home_id")),
            EntityClass::Member => Some(("members", "member_id")),
            EntityClass::Obligation => None,
        }
    }
}

impl std::fmt::Display for EntityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
