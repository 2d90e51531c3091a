//! Terraform-style provider version constraints.
//!
//! A constraint is a comma separated list of clauses such as
//! `">= 4.0, < 6.0"` or `"~> 5.1"`. A bare version means `=`. Partial
//! versions pad with zeros, so `5.1` is `5.1.0`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use semver::{Prerelease, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `~>`: the rightmost given component may increase.
    Pessimistic,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Pessimistic => "~>",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "" | "=" => Some(Operator::Eq),
            "!=" => Some(Operator::NotEq),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Gte),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Lte),
            "~>" => Some(Operator::Pessimistic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Clause {
    op: Operator,
    version: Version,
    /// Components written by the author (1 to 3).
    precision: usize,
    /// Version text as written, kept for display.
    written: String,
}

impl Clause {
    /// Exclusive upper bound of a `~>` clause. `None` when the component
    /// to bump is already `u64::MAX`, leaving the clause unbounded above.
    fn pessimistic_ceiling(&self) -> Option<Version> {
        if self.precision >= 3 {
            let minor = self.version.minor.checked_add(1)?;
            Some(Version::new(self.version.major, minor, 0))
        } else {
            let major = self.version.major.checked_add(1)?;
            Some(Version::new(major, 0, 0))
        }
    }

    fn matches(&self, candidate: &Version) -> bool {
        match self.op {
            Operator::Eq => candidate == &self.version,
            Operator::NotEq => candidate != &self.version,
            Operator::Gt => candidate > &self.version,
            Operator::Gte => candidate >= &self.version,
            Operator::Lt => candidate < &self.version,
            Operator::Lte => candidate <= &self.version,
            Operator::Pessimistic => {
                candidate >= &self.version
                    && self
                        .pessimistic_ceiling()
                        .map_or(true, |ceiling| candidate < &ceiling)
            }
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.as_str(), self.written)
    }
}

#[derive(Debug, Clone)]
struct Bound {
    version: Version,
    inclusive: bool,
}

/// A parsed constraint. An empty constraint accepts every version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionConstraint {
    clauses: Vec<Clause>,
}

fn clause_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(~>|>=|<=|!=|=|>|<)?\s*v?(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:-([0-9A-Za-z.-]+))?$")
            .expect("clause pattern is valid")
    })
}

impl VersionConstraint {
    /// A constraint matching any version.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> ConfigResult<Self> {
        let invalid = |message: String| ConfigError::InvalidConstraint {
            constraint: text.to_string(),
            message,
        };

        let mut clauses = Vec::new();
        for raw in text.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                if text.trim().is_empty() {
                    continue;
                }
                return Err(invalid("empty clause".to_string()));
            }

            let captures = clause_pattern()
                .captures(raw)
                .ok_or_else(|| invalid(format!("cannot parse clause '{}'", raw)))?;

            let op = Operator::parse(captures.get(1).map_or("", |m| m.as_str()))
                .ok_or_else(|| invalid(format!("unknown operator in '{}'", raw)))?;

            let component = |index: usize| -> ConfigResult<Option<u64>> {
                captures
                    .get(index)
                    .map(|m| {
                        m.as_str()
                            .parse::<u64>()
                            .map_err(|e| invalid(format!("component '{}': {}", m.as_str(), e)))
                    })
                    .transpose()
            };

            let major = component(2)?.unwrap_or(0);
            let minor = component(3)?;
            let patch = component(4)?;
            let precision = 1 + minor.is_some() as usize + patch.is_some() as usize;

            let mut version = Version::new(major, minor.unwrap_or(0), patch.unwrap_or(0));
            if let Some(pre) = captures.get(5) {
                version.pre = Prerelease::new(pre.as_str())
                    .map_err(|e| invalid(format!("prerelease '{}': {}", pre.as_str(), e)))?;
            }

            let written = raw[captures.get(1).map_or(0, |m| m.end())..].trim().to_string();
            let clause = Clause {
                op,
                version,
                precision,
                written,
            };
            if !clauses.contains(&clause) {
                clauses.push(clause);
            }
        }

        Ok(Self { clauses })
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Both constraints at once: the distinct clauses of each, in order.
    pub fn intersect(&self, other: &VersionConstraint) -> VersionConstraint {
        let mut clauses = self.clauses.clone();
        for clause in &other.clauses {
            if !clauses.contains(clause) {
                clauses.push(clause.clone());
            }
        }
        VersionConstraint { clauses }
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|clause| clause.matches(version))
    }

    /// Whether at least one version satisfies every clause.
    ///
    /// Computed from the tightest lower and upper bounds plus the explicit
    /// exclusions.
    pub fn is_satisfiable(&self) -> bool {
        let mut lower: Option<Bound> = None;
        let mut upper: Option<Bound> = None;
        let mut excluded: Vec<&Version> = Vec::new();

        for clause in &self.clauses {
            let version = clause.version.clone();
            match clause.op {
                Operator::Eq => {
                    tighten_lower(&mut lower, version.clone(), true);
                    tighten_upper(&mut upper, version, true);
                }
                Operator::NotEq => excluded.push(&clause.version),
                Operator::Gt => tighten_lower(&mut lower, version, false),
                Operator::Gte => tighten_lower(&mut lower, version, true),
                Operator::Lt => tighten_upper(&mut upper, version, false),
                Operator::Lte => tighten_upper(&mut upper, version, true),
                Operator::Pessimistic => {
                    if let Some(ceiling) = clause.pessimistic_ceiling() {
                        tighten_upper(&mut upper, ceiling, false);
                    }
                    tighten_lower(&mut lower, version, true);
                }
            }
        }

        match (&lower, &upper) {
            (Some(low), Some(high)) => match low.version.cmp(&high.version) {
                Ordering::Greater => false,
                Ordering::Equal => {
                    low.inclusive && high.inclusive && !excluded.contains(&&low.version)
                }
                Ordering::Less => true,
            },
            _ => true,
        }
    }
}

fn tighten_lower(bound: &mut Option<Bound>, version: Version, inclusive: bool) {
    let replace = match bound {
        None => true,
        Some(current) => match version.cmp(&current.version) {
            Ordering::Greater => true,
            Ordering::Equal => current.inclusive && !inclusive,
            Ordering::Less => false,
        },
    };
    if replace {
        *bound = Some(Bound { version, inclusive });
    }
}

fn tighten_upper(bound: &mut Option<Bound>, version: Version, inclusive: bool) {
    let replace = match bound {
        None => true,
        Some(current) => match version.cmp(&current.version) {
            Ordering::Less => true,
            Ordering::Equal => current.inclusive && !inclusive,
            Ordering::Greater => false,
        },
    };
    if replace {
        *bound = Some(Bound { version, inclusive });
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, clause) in self.clauses.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", clause)?;
        }
        Ok(())
    }
}

impl FromStr for VersionConstraint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    fn c(text: &str) -> VersionConstraint {
        VersionConstraint::parse(text).unwrap()
    }

    #[test]
    fn test_bare_version_is_pin() {
        let constraint = c("5.1");
        assert!(constraint.matches(&v("5.1.0")));
        assert!(!constraint.matches(&v("5.1.1")));
        assert_eq!(constraint.to_string(), "= 5.1");
    }

    #[test]
    fn test_pessimistic_expansion() {
        let minor = c("~> 5.1");
        assert!(minor.matches(&v("5.1.0")));
        assert!(minor.matches(&v("5.9.3")));
        assert!(!minor.matches(&v("6.0.0")));
        assert!(!minor.matches(&v("5.0.9")));

        let patch = c("~> 5.1.2");
        assert!(patch.matches(&v("5.1.9")));
        assert!(!patch.matches(&v("5.2.0")));
        assert!(!patch.matches(&v("5.1.1")));

        let major = c("~>5");
        assert!(major.matches(&v("5.7.0")));
        assert!(!major.matches(&v("6.0.0")));
    }

    #[test]
    fn test_pessimistic_at_component_limit_is_unbounded() {
        let major = c("~> 18446744073709551615");
        assert!(major.is_satisfiable());
        assert!(major.matches(&Version::new(u64::MAX, 3, 0)));
        assert!(!major.matches(&v("5.0.0")));

        let minor = c("~> 2.18446744073709551615.0");
        assert!(minor.is_satisfiable());
        assert!(minor.matches(&Version::new(2, u64::MAX, 7)));

        assert!(!major.intersect(&c("< 6.0")).is_satisfiable());
        assert!(VersionConstraint::parse("~> 18446744073709551616").is_err());
    }

    #[test]
    fn test_range_clauses() {
        let constraint = c(">= 4.0, < 6.0, != 5.0.1");
        assert!(constraint.matches(&v("4.0.0")));
        assert!(constraint.matches(&v("5.9.0")));
        assert!(!constraint.matches(&v("5.0.1")));
        assert!(!constraint.matches(&v("6.0.0")));
    }

    #[test]
    fn test_empty_constraint_matches_everything() {
        let constraint = c("");
        assert!(constraint.is_any());
        assert!(constraint.matches(&v("0.0.1")));
        assert!(constraint.is_satisfiable());
    }

    #[test]
    fn test_overlapping_intersection_is_satisfiable() {
        let narrowed = c("~> 5.0").intersect(&c(">= 5.10"));
        assert!(narrowed.is_satisfiable());
        assert!(narrowed.matches(&v("5.12.0")));
        assert!(!narrowed.matches(&v("5.9.0")));
        assert_eq!(narrowed.to_string(), "~> 5.0, >= 5.10");
    }

    #[test]
    fn test_disjoint_intersection_is_unsatisfiable() {
        assert!(!c("~> 4.0").intersect(&c(">= 5.0")).is_satisfiable());
        assert!(!c("= 5.1.0").intersect(&c("!= 5.1.0")).is_satisfiable());
        assert!(!c("> 5.0").intersect(&c("< 5.0")).is_satisfiable());
        assert!(!c(">= 5.0").intersect(&c("< 5.0")).is_satisfiable());
    }

    #[test]
    fn test_touching_inclusive_bounds_are_satisfiable() {
        assert!(c(">= 5.0").intersect(&c("<= 5.0")).is_satisfiable());
    }

    #[test]
    fn test_intersection_drops_duplicate_clauses() {
        let merged = c("~> 5.0").intersect(&c("~> 5.0"));
        assert_eq!(merged.to_string(), "~> 5.0");
    }

    #[test]
    fn test_invalid_constraints() {
        assert!(VersionConstraint::parse("~> five").is_err());
        assert!(VersionConstraint::parse("=> 1.0").is_err());
        assert!(VersionConstraint::parse(">= 1.0,,< 2.0").is_err());
    }

    #[test]
    fn test_prerelease_versions() {
        let constraint = c(">= 1.0.0-beta1");
        assert!(constraint.matches(&v("1.0.0")));
        assert!(constraint.matches(&v("1.0.0-beta2")));
        assert!(!constraint.matches(&v("1.0.0-alpha")));
    }
}
