// 💰 Collections & Obligations
//
// Collection (e.g. "Eid Paisa") → SubCollection per year with a default
// amount → one MemberObligation per member who owes it.

use crate::entities::house::AreaKey;
use crate::entities::member::MemberKey;
use crate::error::{RegistryError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type CollectionKey = i64;
pub type SubCollectionKey = i64;
pub type ObligationKey = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub key: Option<CollectionKey>,
    pub name: String,
    pub description: String,
}

impl Collection {
    pub fn new(name: &str, description: &str) -> Self {
        Collection {
            key: None,
            name: name.trim().to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubCollection {
    pub key: Option<SubCollectionKey>,
    pub collection: CollectionKey,
    /// e.g. "2025"
    pub year: String,
    /// e.g. "Eid Paisa 2025"
    pub name: String,
    /// Default amount per member
    pub amount: f64,
    pub due_date: NaiveDate,
}

impl SubCollection {
    pub fn new(collection: CollectionKey, year: &str, name: &str, amount: f64, due_date: NaiveDate) -> Self {
        SubCollection {
            key: None,
            collection,
            year: year.trim().to_string(),
            name: name.trim().to_string(),
            amount,
            due_date,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.year.len() != 4 || !self.year.chars().all(|c| c.is_ascii_digit()) {
            return Err(RegistryError::Validation(format!(
                "year: Expected four digits, got '{}'",
                self.year
            )));
        }
        if self.name.is_empty() {
            return Err(RegistryError::Validation("name: Required field is empty".to_string()));
        }
        if self.amount < 0.0 {
            return Err(RegistryError::Validation("amount: Must not be negative".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaidStatus {
    #[default]
    Pending,
    Paid,
    Overdue,
    Partial,
}

impl PaidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaidStatus::Pending => "pending",
            PaidStatus::Paid => "paid",
            PaidStatus::Overdue => "overdue",
            PaidStatus::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(PaidStatus::Pending),
            "paid" => Some(PaidStatus::Paid),
            "overdue" => Some(PaidStatus::Overdue),
            "partial" => Some(PaidStatus::Partial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberObligation {
    pub key: Option<ObligationKey>,
    pub subcollection: SubCollectionKey,
    pub member: MemberKey,
    /// Denormalized from the member's house for area-level queries
    pub area: Option<AreaKey>,
    /// Can override the sub-collection amount
    pub amount: f64,
    pub paid_status: PaidStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MemberObligation {
    pub fn new(subcollection: SubCollectionKey, member: MemberKey, amount: f64) -> Self {
        MemberObligation {
            key: None,
            subcollection,
            member,
            area: None,
            amount,
            paid_status: PaidStatus::Pending,
            created_at: None,
            updated_at: None,
        }
    }
}
