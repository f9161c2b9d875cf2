//! Closed capability catalog.
//!
//! Each organization configures its skill tags once at setup time. Free-form
//! labels coming from the work-order source or the technician registry are
//! validated against the catalog at ingress and turned into a [`SkillSet`]
//! bitset, so matching never compares strings.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Upper bound on catalog size (one bit per skill).
pub const MAX_SKILLS: usize = 64;

/// A single catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Skill(u8);

impl Skill {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Set of skills, stored as a bitset over catalog indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkillSet(u64);

impl SkillSet {
    pub const EMPTY: SkillSet = SkillSet(0);

    pub fn insert(&mut self, skill: Skill) {
        self.0 |= 1u64 << skill.0;
    }

    pub fn contains(&self, skill: Skill) -> bool {
        self.0 & (1u64 << skill.0) != 0
    }

    /// `self ⊇ other`.
    pub fn is_superset_of(&self, other: &SkillSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Skill> + '_ {
        (0..MAX_SKILLS as u8).filter(|bit| self.0 & (1u64 << bit) != 0).map(Skill)
    }
}

impl FromIterator<Skill> for SkillSet {
    fn from_iter<I: IntoIterator<Item = Skill>>(iter: I) -> Self {
        let mut set = SkillSet::EMPTY;
        for skill in iter {
            set.insert(skill);
        }
        set
    }
}

/// The organization's enumerable set of capability tags.
#[derive(Debug, Clone, Default)]
pub struct SkillCatalog {
    labels: Vec<String>,
    by_label: HashMap<String, Skill>,
}

impl SkillCatalog {
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = SkillCatalog::default();
        for label in labels {
            let normalized = normalize(label.as_ref());
            if normalized.is_empty() {
                return Err(EngineError::Config("empty skill label in catalog".to_string()));
            }
            if catalog.by_label.contains_key(&normalized) {
                continue;
            }
            if catalog.labels.len() == MAX_SKILLS {
                return Err(EngineError::Config(format!(
                    "skill catalog holds at most {} tags",
                    MAX_SKILLS
                )));
            }
            let skill = Skill(catalog.labels.len() as u8);
            catalog.by_label.insert(normalized.clone(), skill);
            catalog.labels.push(normalized);
        }
        Ok(catalog)
    }

    pub fn lookup(&self, label: &str) -> Result<Skill> {
        self.by_label
            .get(&normalize(label))
            .copied()
            .ok_or_else(|| EngineError::UnknownSkill(label.to_string()))
    }

    /// Validate free-form labels and build the matching set.
    pub fn parse<S: AsRef<str>>(&self, labels: &[S]) -> Result<SkillSet> {
        labels.iter().map(|label| self.lookup(label.as_ref())).collect()
    }

    pub fn label(&self, skill: Skill) -> Option<&str> {
        self.labels.get(skill.index()).map(String::as_str)
    }

    pub fn labels_of(&self, set: &SkillSet) -> Vec<&str> {
        set.iter().filter_map(|skill| self.label(skill)).collect()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl fmt::Display for SkillCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.labels.join(", "))
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_ascii_uppercase()
}
