//! Component version ordering and range predicates.
//!
//! Versions are dotted numeric strings (`"1.0"`, `"2.3.1"`). Ordering is
//! segment-wise numeric with missing segments treated as zero, so
//! `"2.0" > "1.9.9"` and `"1.0" == "1.0.0"`. Non-numeric segments compare
//! lexicographically after any numeric segment, which keeps ordering total
//! without rejecting loose tags.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed component version.
///
/// # Examples
///
/// ```
/// use mcp_fabric::version::Version;
///
/// let v1 = Version::parse("1.0");
/// let v2 = Version::parse("2.0");
/// assert!(v2 > v1);
/// assert_eq!(Version::parse("1.0"), Version::parse("1.0.0"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version {
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(u64),
    Text(String),
}

impl Version {
    /// Parses a version string. Never fails; unparseable segments fall
    /// back to text comparison.
    pub fn parse(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The original version string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn segments(&self) -> Vec<Segment> {
        self.raw
            .split('.')
            .map(|s| match s.parse::<u64>() {
                Ok(n) => Segment::Num(n),
                Err(_) => Segment::Text(s.to_string()),
            })
            .collect()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.segments();
        let b = other.segments();
        let len = a.len().max(b.len());
        for i in 0..len {
            let sa = a.get(i).cloned().unwrap_or(Segment::Num(0));
            let sb = b.get(i).cloned().unwrap_or(Segment::Num(0));
            let ord = match (sa, sb) {
                (Segment::Num(x), Segment::Num(y)) => x.cmp(&y),
                (Segment::Num(_), Segment::Text(_)) => Ordering::Less,
                (Segment::Text(_), Segment::Num(_)) => Ordering::Greater,
                (Segment::Text(x), Segment::Text(y)) => x.cmp(&y),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// A version predicate used by lookups and the version-filter transform.
///
/// Unversioned components satisfy every spec except [`VersionSpec::Exact`],
/// which demands a version match.
///
/// # Examples
///
/// ```
/// use mcp_fabric::version::{Version, VersionSpec};
///
/// let spec = VersionSpec::range(Some("2.0"), Some("3.0"));
/// assert!(spec.matches(Some(&Version::parse("2.5"))));
/// assert!(!spec.matches(Some(&Version::parse("3.0"))));
/// assert!(spec.matches(None)); // unversioned passes every range filter
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// Exactly this version. Unversioned components do not match.
    Exact(Version),
    /// `min <= v < max`, each bound optional. Unversioned components pass.
    Range {
        /// Inclusive floor (`>=`).
        min: Option<Version>,
        /// Exclusive ceiling (`<`).
        max: Option<Version>,
    },
}

impl VersionSpec {
    /// An exact-match spec.
    pub fn exact(v: impl Into<String>) -> Self {
        Self::Exact(Version::parse(v))
    }

    /// A range spec with optional inclusive floor and exclusive ceiling.
    pub fn range(min: Option<&str>, max: Option<&str>) -> Self {
        Self::Range {
            min: min.map(Version::parse),
            max: max.map(Version::parse),
        }
    }

    /// Whether a component version satisfies this spec.
    pub fn matches(&self, version: Option<&Version>) -> bool {
        match self {
            Self::Exact(want) => version.is_some_and(|v| v == want),
            Self::Range { min, max } => match version {
                None => true,
                Some(v) => {
                    min.as_ref().is_none_or(|lo| v >= lo) && max.as_ref().is_none_or(|hi| v < hi)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ordering() {
        assert!(Version::parse("2.0") > Version::parse("1.9.9"));
        assert!(Version::parse("1.10") > Version::parse("1.9"));
        assert_eq!(Version::parse("1.0"), Version::parse("1.0.0"));
    }

    #[test]
    fn text_segments_sort_after_numeric() {
        assert!(Version::parse("1.beta") > Version::parse("1.2"));
    }

    #[test]
    fn exact_spec_rejects_unversioned() {
        let spec = VersionSpec::exact("1.0");
        assert!(spec.matches(Some(&Version::parse("1.0"))));
        assert!(!spec.matches(Some(&Version::parse("2.0"))));
        assert!(!spec.matches(None));
    }

    #[test]
    fn range_bounds() {
        let spec = VersionSpec::range(Some("1.0"), Some("2.0"));
        assert!(spec.matches(Some(&Version::parse("1.0"))));
        assert!(spec.matches(Some(&Version::parse("1.9"))));
        assert!(!spec.matches(Some(&Version::parse("2.0"))));
        assert!(!spec.matches(Some(&Version::parse("0.9"))));
    }

    #[test]
    fn open_ended_range() {
        let at_least = VersionSpec::range(Some("2.0"), None);
        assert!(at_least.matches(Some(&Version::parse("99.0"))));
        assert!(!at_least.matches(Some(&Version::parse("1.0"))));

        let below = VersionSpec::range(None, Some("2.0"));
        assert!(below.matches(Some(&Version::parse("0.1"))));
        assert!(!below.matches(Some(&Version::parse("2.0"))));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn ordering_is_antisymmetric(
                a in "[0-9]{1,4}(\\.[0-9]{1,4}){0,3}",
                b in "[0-9]{1,4}(\\.[0-9]{1,4}){0,3}",
            ) {
                let (va, vb) = (Version::parse(a), Version::parse(b));
                prop_assert_eq!(va.cmp(&vb), vb.cmp(&va).reverse());
            }

            #[test]
            fn trailing_zero_segments_are_identity(
                raw in "[0-9]{1,4}(\\.[0-9]{1,4}){0,2}",
            ) {
                prop_assert_eq!(Version::parse(raw.clone()), Version::parse(format!("{raw}.0")));
            }

            #[test]
            fn exact_spec_matches_only_itself(
                raw in "[0-9]{1,4}(\\.[0-9]{1,4}){0,3}",
            ) {
                let spec = VersionSpec::exact(raw.clone());
                prop_assert!(spec.matches(Some(&Version::parse(raw))));
                prop_assert!(!spec.matches(None));
            }
        }
    }
}
