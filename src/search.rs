// 🔎 Fuzzy Search Index - tolerant member lookup
//
// Two queries over the members loaded into a RelationDirectory:
//
// 1. search(term): one free-text term against name, surname, house name and
//    member_id. Name similarity counts three times; an exact member_id hit
//    dominates everything else.
//
// 2. search_parents(query): form-driven lookup used when linking a father,
//    mother or spouse. Each filled form field is compared with the
//    candidate's own value or the value reached through its relations
//    (father, grandfather = father's father, spouse, house).

use crate::config::EngineConfig;
use crate::directory::RelationDirectory;
use crate::entities::Member;
use crate::error::{RegistryError, Result};
use crate::similarity::SimilarityScorer;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Weight of each parent-search field
const PARENT_WEIGHTS: [(&str, f64); 6] = [
    ("name", 3.0),
    ("surname", 1.0),
    ("father", 2.0),
    ("grandfather", 1.0),
    ("spouse", 1.0),
    ("house", 1.0),
];

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub member: Member,
    pub house_name: String,
    pub score: f64,
}

/// Parent-lookup form; blank fields are not compared
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentQuery {
    pub name: String,
    pub surname: String,
    pub father: String,
    pub grandfather: String,
    pub spouse: String,
    pub house: String,
}

impl ParentQuery {
    pub fn named(name: &str) -> Self {
        ParentQuery {
            name: name.to_string(),
            ..ParentQuery::default()
        }
    }

    pub fn is_blank(&self) -> bool {
        self.values().iter().all(|(_, v)| v.trim().is_empty())
    }

    fn values(&self) -> [(&'static str, &str); 6] {
        [
            ("name", self.name.as_str()),
            ("surname", self.surname.as_str()),
            ("father", self.father.as_str()),
            ("grandfather", self.grandfather.as_str()),
            ("spouse", self.spouse.as_str()),
            ("house", self.house.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParentMatch {
    pub member: Member,
    pub father_name: String,
    pub spouse_name: String,
    pub house_name: String,
    pub score: f64,
}

pub struct FuzzySearchIndex {
    /// Composite score a search hit must exceed (default: 1.5)
    pub search_threshold: f64,

    /// Weighted score a parent candidate must exceed (default: 0.55)
    pub parent_threshold: f64,

    /// Maximum parent candidates returned (default: 20)
    pub parent_limit: usize,

    scorer: SimilarityScorer,
}

impl FuzzySearchIndex {
    pub fn new() -> Self {
        FuzzySearchIndex {
            search_threshold: 1.5,
            parent_threshold: 0.55,
            parent_limit: 20,
            scorer: SimilarityScorer::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        FuzzySearchIndex {
            search_threshold: config.search_threshold,
            parent_threshold: config.parent_threshold,
            parent_limit: config.parent_limit,
            scorer: SimilarityScorer::new(),
        }
    }

    // ========================================================================
    // FREE-TEXT SEARCH
    // ========================================================================

    /// Rank the directory's members against one search term, best first
    pub fn search(&self, term: &str, directory: &RelationDirectory<'_>) -> Result<Vec<SearchHit>> {
        let term = term.trim();
        if term.is_empty() {
            return Err(RegistryError::InvalidQuery("search term is empty".to_string()));
        }
        let needle = term.to_lowercase();

        let mut hits: Vec<SearchHit> = directory
            .members()
            .par_iter()
            .filter_map(|member| {
                let house_name = directory.house_name(member);
                let (score, substring) = self.composite(term, &needle, member, house_name);

                if score > self.search_threshold || substring {
                    Some(SearchHit {
                        member: (*member).clone(),
                        house_name: house_name.to_string(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        debug!(term, candidates = directory.len(), hits = hits.len(), "Member search finished");
        Ok(hits)
    }

    /// (composite score, whether the term is a substring of name/surname/member_id)
    fn composite(&self, term: &str, needle: &str, member: &Member, house_name: &str) -> (f64, bool) {
        let name = member.name.to_lowercase();
        let surname = member.surname.to_lowercase();
        let member_id = member.member_id.to_lowercase();

        let mut score = 3.0 * self.scorer.score(term, &member.name);
        if name.contains(needle) {
            score += 0.5;
        }
        score += self.scorer.score(term, &member.surname);
        score += self.scorer.score(term, house_name);

        if !member_id.is_empty() {
            if member_id == needle {
                score += 5.0;
            } else if member_id.contains(needle) {
                score += 2.0;
            }
        }

        let substring = name.contains(needle)
            || surname.contains(needle)
            || (!member_id.is_empty() && member_id.contains(needle));

        (score, substring)
    }

    // ========================================================================
    // PARENT SEARCH
    // ========================================================================

    /// Candidates for a father/mother/spouse link, best first, capped
    pub fn search_parents(
        &self,
        query: &ParentQuery,
        directory: &RelationDirectory<'_>,
    ) -> Result<Vec<ParentMatch>> {
        if query.is_blank() {
            return Err(RegistryError::InvalidQuery(
                "parent search needs a name or at least one other field".to_string(),
            ));
        }
        let query_values = query.values();

        let mut matches: Vec<ParentMatch> = directory
            .members()
            .par_iter()
            .filter_map(|member| {
                let father_name = directory.relation_name("father", &member.father).name;
                let grandfather_name = directory
                    .degrade(directory.resolve("father", &member.father), "father")
                    .map(|father| directory.relation_name("grandfather", &father.father).name)
                    .unwrap_or_default();
                let spouse_name = directory.relation_name("spouse", &member.spouse).name;
                let house_name = directory.house_name(member);

                let candidate_values = [
                    member.name.as_str(),
                    member.surname.as_str(),
                    father_name.as_str(),
                    grandfather_name.as_str(),
                    spouse_name.as_str(),
                    house_name,
                ];

                let fields: Vec<(&str, &str, f64)> = query_values
                    .iter()
                    .zip(candidate_values.iter())
                    .zip(PARENT_WEIGHTS.iter())
                    .map(|(((_, wanted), have), (_, weight))| (*wanted, *have, *weight))
                    .collect();

                let score = self.scorer.weighted_score(&fields);
                if score <= self.parent_threshold {
                    return None;
                }

                Some(ParentMatch {
                    member: (*member).clone(),
                    father_name: father_name.clone(),
                    spouse_name: spouse_name.clone(),
                    house_name: house_name.to_string(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        matches.truncate(self.parent_limit);

        debug!(candidates = directory.len(), matches = matches.len(), "Parent search finished");
        Ok(matches)
    }
}

impl Default for FuzzySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{House, MemberKey, PersonName, Relation};
    use chrono::NaiveDate;

    fn member(key: MemberKey, name: &str, surname: &str) -> Member {
        let mut member = Member::new(name, surname, NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
        member.key = Some(key);
        member.member_id = (1000 + key).to_string();
        member
    }

    #[test]
    fn test_misspelled_name_is_found() {
        let members = vec![member(1, "Mohammed Ali", ""), member(2, "Fathima", "")];
        let directory = RelationDirectory::new(&members, &[]);

        let hits = FuzzySearchIndex::new().search("Muhammed", &directory).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].member.name, "Mohammed Ali");
        assert!((hits[0].score - 2.1).abs() < 1e-9);
    }

    #[test]
    fn test_exact_member_id_ranks_first() {
        let members = vec![member(1, "Ali", ""), member(2, "Ali", "")];
        let directory = RelationDirectory::new(&members, &[]);

        let hits = FuzzySearchIndex::new().search("1002", &directory).unwrap();
        assert_eq!(hits[0].member.member_id, "1002");
        assert!(hits[0].score >= 5.0);
    }

    #[test]
    fn test_substring_hit_kept_below_threshold() {
        // "ali" scores low against a long name but is a substring of it
        let members = vec![member(1, "Abdul Khader Ali Haji Kunhi", "")];
        let directory = RelationDirectory::new(&members, &[]);

        let index = FuzzySearchIndex::new();
        let hits = index.search("ali", &directory).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_blank_term_is_rejected() {
        let members = vec![member(1, "Ali", "")];
        let directory = RelationDirectory::new(&members, &[]);

        let err = FuzzySearchIndex::new().search("   ", &directory).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidQuery(_)));
    }

    #[test]
    fn test_house_name_contributes() {
        let mut house = House::new("Rose Villa", "Kareem", 1);
        house.key = Some(1);
        let houses = vec![house];
        let mut resident = member(1, "Zubair", "");
        resident.house = Some(1);
        let members = vec![resident];
        let directory = RelationDirectory::new(&members, &houses);

        // a perfect house match alone is worth 1.0
        let index = FuzzySearchIndex {
            search_threshold: 0.9,
            ..FuzzySearchIndex::new()
        };
        let hits = index.search("Rose Villa", &directory).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].house_name, "Rose Villa");
    }

    #[test]
    fn test_parent_search_by_name() {
        let members = vec![member(1, "Mohammed Ali", ""), member(2, "Fathima", "")];
        let directory = RelationDirectory::new(&members, &[]);

        let matches = FuzzySearchIndex::new()
            .search_parents(&ParentQuery::named("Muhammed"), &directory)
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].member.name, "Mohammed Ali");
    }

    #[test]
    fn test_parent_search_through_father_and_grandfather() {
        let grandfather = member(1, "Kunhi Moideen", "");
        let mut father = member(2, "Abdul", "");
        father.father = Relation::linked(1);
        let mut son_a = member(3, "Rashid", "");
        son_a.father = Relation::linked(2);
        let mut son_b = member(4, "Rashid", "");
        son_b.father = Relation::unlinked("Hamza", "");
        let members = vec![grandfather, father, son_a, son_b];
        let directory = RelationDirectory::new(&members, &[]);

        let query = ParentQuery {
            name: "Rashid".to_string(),
            father: "Abdul".to_string(),
            grandfather: "Kunhi Moideen".to_string(),
            ..ParentQuery::default()
        };
        let matches = FuzzySearchIndex::new().search_parents(&query, &directory).unwrap();

        assert_eq!(matches[0].member.key, Some(3));
        assert_eq!(matches[0].score, 1.0);
        assert_eq!(matches[0].father_name, "Abdul");
    }

    #[test]
    fn test_parent_search_survives_broken_links() {
        let mut orphan = member(1, "Rashid", "");
        orphan.father = Relation::Linked {
            key: 404,
            known_as: PersonName::new("Abdul", ""),
        };
        orphan.spouse = Relation::linked(405);
        orphan.house = Some(406);
        let members = vec![orphan];
        let directory = RelationDirectory::new(&members, &[]);

        let query = ParentQuery {
            name: "Rashid".to_string(),
            father: "Abdul".to_string(),
            spouse: "Aysha".to_string(),
            ..ParentQuery::default()
        };
        let matches = FuzzySearchIndex::new().search_parents(&query, &directory).unwrap();

        // father falls back to the stored name; spouse and house are absent
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].father_name, "Abdul");
        assert_eq!(matches[0].score, 1.0);
    }

    #[test]
    fn test_parent_search_blank_query_is_rejected() {
        let members = vec![member(1, "Ali", "")];
        let directory = RelationDirectory::new(&members, &[]);

        let err = FuzzySearchIndex::new()
            .search_parents(&ParentQuery::default(), &directory)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidQuery(_)));
    }

    #[test]
    fn test_parent_search_is_capped() {
        let members: Vec<Member> = (1..=30).map(|k| member(k, "Ali", "")).collect();
        let directory = RelationDirectory::new(&members, &[]);

        let matches = FuzzySearchIndex::new()
            .search_parents(&ParentQuery::named("Ali"), &directory)
            .unwrap();
        assert_eq!(matches.len(), 20);
        assert_eq!(matches[0].member.key, Some(1));
    }
}
