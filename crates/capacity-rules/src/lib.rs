#![deny(warnings)]

//! Height-override rules: typed filters, matching against parcel attribute
//! records, and the editable rule set of a planning session.

use capacity_core::ParcelAttributes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Creation-order identifier of a rule within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u64);

/// One filter dimension: either unconstrained or pinned to a value.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter<T> {
    Any,
    Only(T),
}

impl<T> Default for Filter<T> {
    fn default() -> Self {
        Filter::Any
    }
}

impl<T> From<Option<T>> for Filter<T> {
    fn from(v: Option<T>) -> Self {
        v.map_or(Filter::Any, Filter::Only)
    }
}

impl<T> Filter<T> {
    /// True for `Any`, otherwise the verdict of `pred` on the pinned value.
    pub fn admits(&self, pred: impl FnOnce(&T) -> bool) -> bool {
        match self {
            Filter::Any => true,
            Filter::Only(v) => pred(v),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Filter::Any)
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Filter::Any => None,
            Filter::Only(v) => Some(v),
        }
    }
}

impl Filter<String> {
    fn without_blank(self) -> Self {
        match self {
            Filter::Only(s) if s.trim().is_empty() => Filter::Any,
            other => other,
        }
    }
}

impl<T: Serialize> Serialize for Filter<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Filter::Any => serializer.serialize_none(),
            Filter::Only(v) => serializer.serialize_some(v),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Filter<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Filter::from)
    }
}

/// What a rule says: its filters and the height it proposes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub neighborhood: Filter<String>,
    /// A single zoning code looked up in the parcel's code list.
    #[serde(default)]
    pub zoning_code: Filter<String>,
    /// Baseline height limit in feet.
    #[serde(default, rename = "fzp_height")]
    pub baseline_height: Filter<f64>,
    /// Maximum distance to transit in feet (inclusive).
    #[serde(default, rename = "transit_distance")]
    pub max_transit_distance: Filter<f64>,
    pub proposed_height: f64,
}

impl RuleSpec {
    /// Rule proposing `height` for every parcel.
    pub fn everywhere(height: f64) -> Self {
        RuleSpec {
            proposed_height: height,
            ..RuleSpec::default()
        }
    }

    /// True iff every pinned filter matches `attrs`. A transit filter fails
    /// closed when the distance is missing or not numeric.
    pub fn matches(&self, attrs: &ParcelAttributes) -> bool {
        self.neighborhood
            .admits(|n| attrs.neighborhood.as_deref() == Some(n.as_str()))
            && self
                .zoning_code
                .admits(|code| attrs.zoning_codes().any(|c| c == code.as_str()))
            && self
                .baseline_height
                .admits(|h| attrs.baseline_height() == Some(*h))
            && self
                .max_transit_distance
                .admits(|max| attrs.transit_distance().is_some_and(|d| d <= *max))
    }

    fn normalized(self) -> Self {
        RuleSpec {
            neighborhood: self.neighborhood.without_blank(),
            zoning_code: self.zoning_code.without_blank(),
            ..self
        }
    }

    fn validate(&self) -> Result<(), RuleError> {
        if !self.proposed_height.is_finite() || self.proposed_height < 0.0 {
            return Err(RuleError::InvalidHeight(self.proposed_height));
        }
        for v in [&self.baseline_height, &self.max_transit_distance]
            .into_iter()
            .filter_map(|f| f.as_option())
        {
            if !v.is_finite() {
                return Err(RuleError::NonFiniteFilter);
            }
        }
        Ok(())
    }
}

/// A rule registered in a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub spec: RuleSpec,
}

/// Does `rule` apply to the parcel described by `attrs`?
pub fn matches(rule: &Rule, attrs: &ParcelAttributes) -> bool {
    rule.spec.matches(attrs)
}

/// Highest proposed height among the rules matching `attrs`, if any.
pub fn effective_height(rules: &[Rule], attrs: &ParcelAttributes) -> Option<f64> {
    rules
        .iter()
        .filter(|r| matches(r, attrs))
        .map(|r| r.spec.proposed_height)
        .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |m| m.max(h))))
}

/// Errors raised while editing or loading rules.
#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("proposed height must be a finite, non-negative number of feet, got {0}")]
    InvalidHeight(f64),
    #[error("numeric rule filters must be finite")]
    NonFiniteFilter,
    #[error("unknown rule: {0:?}")]
    UnknownRule(RuleId),
    #[error("invalid rule file: {0}")]
    InvalidFile(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RuleError {
    fn from(e: std::io::Error) -> Self {
        RuleError::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for RuleError {
    fn from(e: serde_yaml::Error) -> Self {
        RuleError::InvalidFile(e.to_string())
    }
}

#[derive(Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

/// User-editable set of height-override rules, kept in creation order.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    next_id: u64,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new rule and return its identifier.
    pub fn add(&mut self, spec: RuleSpec) -> Result<RuleId, RuleError> {
        spec.validate()?;
        self.next_id += 1;
        let id = RuleId(self.next_id);
        self.rules.push(Rule {
            id,
            spec: spec.normalized(),
        });
        debug!(rule = id.0, "rule added");
        Ok(id)
    }

    /// Replace the filters and height of rule `id` in place.
    pub fn update(&mut self, id: RuleId, spec: RuleSpec) -> Result<(), RuleError> {
        spec.validate()?;
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RuleError::UnknownRule(id))?;
        rule.spec = spec.normalized();
        debug!(rule = id.0, "rule updated");
        Ok(())
    }

    pub fn remove(&mut self, id: RuleId) -> Result<Rule, RuleError> {
        let idx = self
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or(RuleError::UnknownRule(id))?;
        debug!(rule = id.0, "rule removed");
        Ok(self.rules.remove(idx))
    }

    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn effective_height(&self, attrs: &ParcelAttributes) -> Option<f64> {
        effective_height(&self.rules, attrs)
    }

    /// Build a rule set from a YAML document with a top-level `rules` list.
    pub fn from_yaml_str(text: &str) -> Result<Self, RuleError> {
        let file: RuleFile = serde_yaml::from_str(text)?;
        let mut set = RuleSet::new();
        for spec in file.rules {
            set.add(spec)?;
        }
        Ok(set)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RuleError> {
        let text = fs::read_to_string(path.as_ref())?;
        let set = Self::from_yaml_str(&text)?;
        info!(path = %path.as_ref().display(), rules = set.len(), "loaded rule file");
        Ok(set)
    }
}
