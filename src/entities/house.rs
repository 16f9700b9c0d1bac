// 🏠 House & Area Entities
//
// A house belongs to exactly one area and carries its own sequential
// display identifier (home_id), independent from the member sequence.

use crate::error::{RegistryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type HouseKey = i64;
pub type AreaKey = i64;

// ============================================================================
// AREA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub key: Option<AreaKey>,
    /// Unique area name
    pub name: String,
    pub description: String,
}

impl Area {
    pub fn new(name: &str, description: &str) -> Self {
        Area {
            key: None,
            name: name.trim().to_string(),
            description: description.to_string(),
        }
    }
}

// ============================================================================
// HOUSE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct House {
    /// Row identity (None until persisted)
    pub key: Option<HouseKey>,

    /// Sequential display identifier, empty until allocated
    pub home_id: String,

    pub house_name: String,
    pub family_name: String,
    pub location_name: String,
    pub address: String,
    pub area: AreaKey,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl House {
    pub fn new(house_name: &str, family_name: &str, area: AreaKey) -> Self {
        House {
            key: None,
            home_id: String::new(),
            house_name: house_name.trim().to_string(),
            family_name: family_name.trim().to_string(),
            location_name: String::new(),
            address: String::new(),
            area,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_new(&self) -> bool {
        self.key.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.house_name.trim().is_empty() {
            errors.push("house_name: Required field is empty");
        }
        if self.family_name.trim().is_empty() {
            errors.push("family_name: Required field is empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Validation(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_house_creation() {
        let house = House::new(" TestHouse ", "TestFamily", 1);
        assert!(house.is_new());
        assert_eq!(house.house_name, "TestHouse");
        assert!(house.home_id.is_empty());
        assert!(house.validate().is_ok());
    }

    #[test]
    fn test_house_requires_names() {
        let house = House::new("", "", 1);
        let err = house.validate().unwrap_err();
        assert!(err.to_string().contains("house_name"));
        assert!(err.to_string().contains("family_name"));
    }
}
