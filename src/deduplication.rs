// 🔍 Duplicate Detector - flag likely duplicates before a record is created
//
// Every non-blank query field is scored against the same field of each
// candidate (Ratcliff/Obershelp), weighted, and averaged over the fields that
// were actually compared. Candidates strictly above the threshold are
// returned, best first.
//
// Brute force: one pass over the loaded candidates per query, scored in
// parallel with rayon.

use crate::config::EngineConfig;
use crate::directory::RelationDirectory;
use crate::entities::{House, Member};
use crate::error::{RegistryError, Result};
use crate::similarity::SimilarityScorer;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// FIELD SOURCE
// ============================================================================

/// A record that exposes named text fields for comparison
pub trait FieldSource {
    /// Value of a named field; `None` when the record has no such field
    fn field(&self, name: &str) -> Option<&str>;

    /// Display identifier used in match reasons
    fn display_id(&self) -> &str;
}

impl FieldSource for House {
    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "home_id" => Some(&self.home_id),
            "house_name" => Some(&self.house_name),
            "family_name" => Some(&self.family_name),
            "location_name" => Some(&self.location_name),
            "address" => Some(&self.address),
            _ => None,
        }
    }

    fn display_id(&self) -> &str {
        &self.home_id
    }
}

impl FieldSource for Member {
    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "member_id" => Some(&self.member_id),
            "name" => Some(&self.name),
            "surname" => Some(&self.surname),
            "adhar" => self.adhar.as_deref(),
            "phone" => self.phone.as_deref(),
            _ => None,
        }
    }

    fn display_id(&self) -> &str {
        &self.member_id
    }
}

/// A member read through a directory. `father` and `mother` are the linked
/// parent's current first name, or the stored name when unlinked or broken,
/// the same values parent search compares.
#[derive(Debug, Clone)]
pub struct MemberCandidate<'a> {
    pub member: &'a Member,
    father: String,
    mother: String,
}

impl<'a> MemberCandidate<'a> {
    pub fn new(member: &'a Member, directory: &RelationDirectory<'a>) -> Self {
        MemberCandidate {
            member,
            father: directory.relation_name("father", &member.father).name,
            mother: directory.relation_name("mother", &member.mother).name,
        }
    }
}

impl FieldSource for MemberCandidate<'_> {
    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "father" => Some(&self.father),
            "mother" => Some(&self.mother),
            other => self.member.field(other),
        }
    }

    fn display_id(&self) -> &str {
        &self.member.member_id
    }
}

// ============================================================================
// DUPLICATE MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMatch<T> {
    pub entity: T,

    /// Weighted similarity (0.0 - 1.0)
    pub confidence: f64,

    /// Human-readable reason
    pub reason: String,
}

// ============================================================================
// DUPLICATE DETECTOR
// ============================================================================

pub struct DuplicateDetector {
    /// Scores must be strictly greater than this (default: 0.6)
    pub threshold: f64,

    /// Maximum number of matches returned (default: 10)
    pub limit: usize,

    /// Per-field weights; fields not listed weigh 1.0
    pub weights: HashMap<String, f64>,

    scorer: SimilarityScorer,
}

impl DuplicateDetector {
    /// Create detector with default threshold and limit
    pub fn new() -> Self {
        DuplicateDetector {
            threshold: 0.6,
            limit: 10,
            weights: HashMap::new(),
            scorer: SimilarityScorer::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        DuplicateDetector {
            threshold: config.duplicate_threshold,
            limit: config.duplicate_limit,
            ..Self::new()
        }
    }

    pub fn with_weight(mut self, field: &str, weight: f64) -> Self {
        self.weights.insert(field.to_string(), weight);
        self
    }

    fn weight_of(&self, field: &str) -> f64 {
        self.weights.get(field).copied().unwrap_or(1.0)
    }

    /// Rank candidates by weighted similarity to the query fields.
    ///
    /// `query` holds (field name, value) pairs; blank values are ignored and a
    /// query with nothing left is rejected.
    pub fn find_duplicates<T>(&self, query: &[(&str, &str)], candidates: &[T]) -> Result<Vec<DuplicateMatch<T>>>
    where
        T: FieldSource + Clone + Send + Sync,
    {
        let fields: Vec<(&str, &str)> = query
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(name, value)| (*name, value.trim()))
            .collect();

        if fields.is_empty() {
            return Err(RegistryError::InvalidQuery(
                "at least one non-blank field is required to look for duplicates".to_string(),
            ));
        }

        // Parallel scoring keeps candidate order, so the stable sort below
        // leaves ties in input order
        let mut matches: Vec<DuplicateMatch<T>> = candidates
            .par_iter()
            .filter_map(|candidate| self.score_candidate(&fields, candidate))
            .collect();

        matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
        matches.truncate(self.limit);

        debug!(
            candidates = candidates.len(),
            matches = matches.len(),
            threshold = self.threshold,
            "Duplicate scan finished"
        );

        Ok(matches)
    }

    fn score_candidate<T>(&self, fields: &[(&str, &str)], candidate: &T) -> Option<DuplicateMatch<T>>
    where
        T: FieldSource + Clone,
    {
        let compared: Vec<(&str, &str, &str, f64)> = fields
            .iter()
            .filter_map(|(name, value)| {
                candidate
                    .field(name)
                    .map(|other| (*name, *value, other, self.weight_of(name)))
            })
            .collect();

        let weighted: Vec<(&str, &str, f64)> = compared
            .iter()
            .map(|(_, value, other, weight)| (*value, *other, *weight))
            .collect();

        let confidence = self.scorer.weighted_score(&weighted);
        if confidence <= self.threshold {
            return None;
        }

        let details: Vec<String> = compared
            .iter()
            .filter(|(_, _, other, weight)| *weight > 0.0 && !other.trim().is_empty())
            .map(|(name, value, other, _)| {
                format!("{} '{}' ≈ '{}' ({:.2})", name, value, other, self.scorer.score(value, other))
            })
            .collect();

        Some(DuplicateMatch {
            entity: candidate.clone(),
            confidence,
            reason: format!("{}: {}", candidate.display_id(), details.join(" | ")),
        })
    }

    /// House form check: house name and family name, equal weights
    pub fn check_house_duplicates(
        &self,
        house_name: &str,
        family_name: &str,
        houses: &[House],
    ) -> Result<Vec<DuplicateMatch<House>>> {
        self.find_duplicates(&[("house_name", house_name), ("family_name", family_name)], houses)
    }

    /// Member duplicates over every member in the directory. Besides the
    /// member's own fields, `father` and `mother` can be queried.
    pub fn find_member_duplicates(
        &self,
        query: &[(&str, &str)],
        directory: &RelationDirectory<'_>,
    ) -> Result<Vec<DuplicateMatch<Member>>> {
        let candidates: Vec<MemberCandidate<'_>> = directory
            .members()
            .iter()
            .map(|member| MemberCandidate::new(member, directory))
            .collect();

        Ok(self
            .find_duplicates(query, &candidates)?
            .into_iter()
            .map(|m| DuplicateMatch {
                entity: m.entity.member.clone(),
                confidence: m.confidence,
                reason: m.reason,
            })
            .collect())
    }

    /// Member form check: name and surname
    pub fn check_member_duplicates(
        &self,
        name: &str,
        surname: &str,
        directory: &RelationDirectory<'_>,
    ) -> Result<Vec<DuplicateMatch<Member>>> {
        self.find_member_duplicates(&[("name", name), ("surname", surname)], directory)
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
