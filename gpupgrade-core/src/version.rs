//! Database version parsing and compatibility.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AppError;

/// The query used to fetch a database's version string.
pub const VERSION_QUERY: &str = "SELECT version()";
/// Clusters must be strictly newer than this version to be upgraded.
pub const MINIMUM_VERSION: &str = "4.3.9.0";

lazy_static! {
    /// Regular expression capturing the version token of a `SELECT version()` result.
    static ref RE_VERSION: Regex = Regex::new("Greenplum Database (.*) build").expect("failed to compile RE_VERSION regex");
}

/// A dotted release version with an optional pre-release tag, e.g. `5.0.0-beta.5+dev.4`.
///
/// Release components are compared numerically, with missing trailing components treated as
/// zero, so `4.3.9` and `4.3.9.0` are equal. A version carrying a pre-release tag sorts before
/// the same release without one. Pre-release tags are compared identifier by identifier, numeric
/// identifiers numerically, so `beta.9` sorts before `beta.10`. Build metadata following `+` is
/// ignored.
#[derive(Clone, Debug)]
pub struct Version {
    release: Vec<u64>,
    pre_release: Option<String>,
}

impl Version {
    /// Extract and parse the version token from a `SELECT version()` result.
    pub fn from_version_string(raw: &str) -> Result<Self, AppError> {
        let token = RE_VERSION
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .ok_or_else(|| AppError::VersionParse(raw.to_string()))?;
        token.parse()
    }

    /// Returns true if this version is strictly newer than the minimum supported version.
    pub fn is_upgradable(&self) -> Result<bool, AppError> {
        let floor: Version = MINIMUM_VERSION.parse()?;
        Ok(self > &floor)
    }
}

impl FromStr for Version {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let without_meta = s.split('+').next().unwrap_or_default();
        let (release_str, pre_release) = match without_meta.split_once('-') {
            Some((release, pre)) if !pre.is_empty() => (release, Some(pre.to_string())),
            Some(_) => return Err(AppError::VersionParse(s.to_string())),
            None => (without_meta, None),
        };
        if release_str.is_empty() {
            return Err(AppError::VersionParse(s.to_string()));
        }
        let release = release_str
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| AppError::VersionParse(s.to_string()))?;
        Ok(Self { release, pre_release })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(|part| part.to_string()).collect();
        f.write_str(&release.join("."))?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for idx in 0..len {
            let (lhs, rhs) = (self.release.get(idx).copied().unwrap_or(0), other.release.get(idx).copied().unwrap_or(0));
            match lhs.cmp(&rhs) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        match (&self.pre_release, &other.pre_release) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(lhs), Some(rhs)) => cmp_pre_release(lhs, rhs),
        }
    }
}

/// Compare two pre-release tags by their dot-separated identifiers.
///
/// Numeric identifiers compare numerically and sort before alphanumeric ones; a tag which is a
/// prefix of the other sorts first.
fn cmp_pre_release(lhs: &str, rhs: &str) -> Ordering {
    let mut lhs_ids = lhs.split('.');
    let mut rhs_ids = rhs.split('.');
    loop {
        let ord = match (lhs_ids.next(), rhs_ids.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(lhs), Some(rhs)) => match (lhs.parse::<u64>(), rhs.parse::<u64>()) {
                (Ok(lhs), Ok(rhs)) => lhs.cmp(&rhs),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => lhs.cmp(rhs),
            },
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}
