// 👤 Member Entity - surrogate key + display identifier + family relations
//
// "member_id is what people read, key is what rows point at"
//
// Problem solved:
// - Relations can be known only by name ("father: Abdul") or by record link
// - A link keeps the name it was entered with, so a broken link still displays
// - Legacy rows may carry links to members that no longer exist

use crate::entities::house::HouseKey;
use crate::error::{RegistryError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Internal row identity of a member
pub type MemberKey = i64;

// ============================================================================
// PERSON NAME
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub name: String,
    pub surname: String,
}

impl PersonName {
    pub fn new(name: &str, surname: &str) -> Self {
        PersonName {
            name: name.trim().to_string(),
            surname: surname.trim().to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty() && self.surname.trim().is_empty()
    }

    /// "Name Surname", or just the name when there is no surname
    pub fn full(&self) -> String {
        format!("{} {}", self.name.trim(), self.surname.trim())
            .trim()
            .to_string()
    }
}

// ============================================================================
// RELATION
// ============================================================================

/// Father / mother / spouse reference
///
/// Either a link to a member row (with the name it was known by when linked)
/// or only a free-text name for someone who is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relation {
    Linked { key: MemberKey, known_as: PersonName },
    Unlinked(PersonName),
}

impl Relation {
    /// No link and no name
    pub fn none() -> Self {
        Relation::Unlinked(PersonName::default())
    }

    pub fn linked(key: MemberKey) -> Self {
        Relation::Linked {
            key,
            known_as: PersonName::default(),
        }
    }

    pub fn unlinked(name: &str, surname: &str) -> Self {
        Relation::Unlinked(PersonName::new(name, surname))
    }

    pub fn key(&self) -> Option<MemberKey> {
        match self {
            Relation::Linked { key, .. } => Some(*key),
            Relation::Unlinked(_) => None,
        }
    }

    /// Denormalized name stored with the relation
    pub fn known_as(&self) -> &PersonName {
        match self {
            Relation::Linked { known_as, .. } => known_as,
            Relation::Unlinked(name) => name,
        }
    }

    pub fn points_to(&self, target: MemberKey) -> bool {
        self.key() == Some(target)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Relation::Unlinked(name) if name.is_blank())
    }

    /// Rebuild from stored columns (key wins over text)
    pub fn from_parts(key: Option<MemberKey>, name: String, surname: String) -> Self {
        let known_as = PersonName { name, surname };
        match key {
            Some(key) => Relation::Linked { key, known_as },
            None => Relation::Unlinked(known_as),
        }
    }
}

impl Default for Relation {
    fn default() -> Self {
        Relation::none()
    }
}

// ============================================================================
// STATUS / GENDER
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Live,
    Dead,
    Terminated,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Live => "live",
            MemberStatus::Dead => "dead",
            MemberStatus::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "live" => Some(MemberStatus::Live),
            "dead" => Some(MemberStatus::Dead),
            "terminated" => Some(MemberStatus::Terminated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Some(Gender::Male),
            "female" | "f" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            _ => None,
        }
    }
}

// ============================================================================
// MEMBER ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    /// Row identity (None until persisted)
    pub key: Option<MemberKey>,

    /// Sequential display identifier ("1001", "1002", ...), empty until allocated
    pub member_id: String,

    // ========================================================================
    // VALUES
    // ========================================================================
    pub name: String,
    pub surname: String,
    pub gender: Option<Gender>,
    pub date_of_birth: NaiveDate,
    pub date_of_death: Option<NaiveDate>,
    pub status: MemberStatus,
    pub house: Option<HouseKey>,

    /// Last 4 digits of the national id
    pub adhar: Option<String>,
    pub is_guardian: bool,
    pub general_body_member: bool,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,

    // ========================================================================
    // RELATIONS
    // ========================================================================
    pub father: Relation,
    pub mother: Relation,
    pub spouse: Relation,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(name: &str, surname: &str, date_of_birth: NaiveDate) -> Self {
        Member {
            key: None,
            member_id: String::new(),
            name: name.trim().to_string(),
            surname: surname.trim().to_string(),
            gender: None,
            date_of_birth,
            date_of_death: None,
            status: MemberStatus::Live,
            house: None,
            adhar: None,
            is_guardian: false,
            general_body_member: false,
            phone: None,
            whatsapp: None,
            father: Relation::none(),
            mother: Relation::none(),
            spouse: Relation::none(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn person_name(&self) -> PersonName {
        PersonName {
            name: self.name.clone(),
            surname: self.surname.clone(),
        }
    }

    pub fn full_name(&self) -> String {
        self.person_name().full()
    }

    pub fn is_new(&self) -> bool {
        self.key.is_none()
    }

    /// Check entity invariants before persistence
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name: Required field is empty".to_string());
        }

        if let Some(death) = self.date_of_death {
            if death < self.date_of_birth {
                errors.push(format!(
                    "date_of_death: {} is before date_of_birth {}",
                    death, self.date_of_birth
                ));
            }
        }

        if let Some(adhar) = &self.adhar {
            if adhar.len() != 4 || !adhar.chars().all(|c| c.is_ascii_digit()) {
                errors.push("adhar: Enter the last 4 digits of Aadhaar".to_string());
            }
        }

        if let Some(key) = self.key {
            for (role, relation) in [
                ("father", &self.father),
                ("mother", &self.mother),
                ("spouse", &self.spouse),
            ] {
                if relation.points_to(key) {
                    errors.push(format!("{}: A member cannot be their own {}", role, role));
                }
            }
        }

        if let (Some(father), Some(mother)) = (self.father.key(), self.mother.key()) {
            if father == mother {
                errors.push("mother: Father and mother point at the same member".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Validation(errors.join("; ")))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_member_creation() {
        let member = Member::new(" Mohammed Ali ", "K", date("2000-01-01"));

        assert!(member.is_new());
        assert!(member.member_id.is_empty());
        assert_eq!(member.name, "Mohammed Ali");
        assert_eq!(member.status, MemberStatus::Live);
        assert!(member.father.is_none());
        assert_eq!(member.full_name(), "Mohammed Ali K");
    }

    #[test]
    fn test_full_name_without_surname() {
        let name = PersonName::new("Fathima", "");
        assert_eq!(name.full(), "Fathima");
        assert!(!name.is_blank());
        assert!(PersonName::new("  ", "").is_blank());
    }

    #[test]
    fn test_death_before_birth_is_rejected() {
        let mut member = Member::new("Aysha", "", date("1990-05-01"));
        member.date_of_death = Some(date("1989-12-31"));

        let err = member.validate().unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
        assert!(err.to_string().contains("date_of_death"));
    }

    #[test]
    fn test_death_on_birth_day_is_allowed() {
        let mut member = Member::new("Aysha", "", date("1990-05-01"));
        member.date_of_death = Some(date("1990-05-01"));
        member.status = MemberStatus::Dead;

        assert!(member.validate().is_ok());
    }

    #[test]
    fn test_adhar_must_be_four_digits() {
        let mut member = Member::new("Rashid", "", date("1980-01-01"));
        member.adhar = Some("12a4".to_string());
        assert!(member.validate().is_err());

        member.adhar = Some("1234".to_string());
        assert!(member.validate().is_ok());
    }

    #[test]
    fn test_member_cannot_be_own_spouse() {
        let mut member = Member::new("Rashid", "", date("1980-01-01"));
        member.key = Some(5);
        member.spouse = Relation::linked(5);

        let err = member.validate().unwrap_err();
        assert!(err.to_string().contains("spouse"));
    }

    #[test]
    fn test_relation_from_parts() {
        let linked = Relation::from_parts(Some(3), "Abdul".to_string(), String::new());
        assert_eq!(linked.key(), Some(3));
        assert_eq!(linked.known_as().name, "Abdul");

        let unlinked = Relation::from_parts(None, "Abdul".to_string(), "P".to_string());
        assert_eq!(unlinked.key(), None);
        assert!(!unlinked.is_none());

        let empty = Relation::from_parts(None, String::new(), String::new());
        assert!(empty.is_none());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(MemberStatus::parse("Dead"), Some(MemberStatus::Dead));
        assert_eq!(MemberStatus::parse("terminated"), Some(MemberStatus::Terminated));
        assert_eq!(MemberStatus::parse("unknown"), None);
        assert_eq!(Gender::parse("F"), Some(Gender::Female));
    }
}
