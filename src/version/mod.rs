// src/version/mod.rs

//! Version handling and branch/revision comparison.
//!
//! A full version string is `/label1/label2/.../labelN/revision[@timestamp]`:
//! an ordered chain of labels naming the branch the version lives on,
//! terminated by a revision (`upstreamVersion-sourceCount[-buildCount]`).
//! The optional trailing `@timestamp` carries the `finalTimestamp` used to
//! break ties between rebuilds that share a revision.

use crate::error::{Error, Result};
use crate::label::{Branch, Label};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// `upstreamVersion-sourceCount[-buildCount]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    pub upstream: String,
    pub source_count: u32,
    pub build_count: Option<u32>,
}

impl Revision {
    pub fn new(upstream: impl Into<String>, source_count: u32, build_count: Option<u32>) -> Self {
        Self {
            upstream: upstream.into(),
            source_count,
            build_count,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let pieces: Vec<&str> = s.split('-').collect();
        if pieces.len() < 2 {
            return Err(Error::parse(format!(
                "revision '{s}' must have at least upstreamVersion-sourceCount"
            )));
        }
        // The last one or two dash-separated fields are the counts; the
        // upstream version is everything before them (it may itself
        // contain hyphens, though that is rare in practice).
        let (upstream, source, build) = if pieces.len() == 2 {
            (pieces[0].to_string(), pieces[1], None)
        } else {
            let maybe_build = pieces[pieces.len() - 1];
            let maybe_source = pieces[pieces.len() - 2];
            if maybe_build.parse::<u32>().is_ok() && maybe_source.parse::<u32>().is_ok() {
                (pieces[..pieces.len() - 2].join("-"), maybe_source, Some(maybe_build))
            } else {
                (pieces[..pieces.len() - 1].join("-"), pieces[pieces.len() - 1], None)
            }
        };

        if upstream.is_empty() {
            return Err(Error::parse("empty upstream version component"));
        }
        let source_count = source
            .parse::<u32>()
            .map_err(|e| Error::parse(format!("invalid source count '{source}': {e}")))?;
        let build_count = build
            .map(|b| {
                b.parse::<u32>()
                    .map_err(|e| Error::parse(format!("invalid build count '{b}': {e}")))
            })
            .transpose()?;
        Ok(Self {
            upstream,
            source_count,
            build_count,
        })
    }

    /// Dotted-decimal comparison: numeric segments compare numerically,
    /// non-numeric segments compare lexically, missing trailing segments
    /// sort as lower.
    fn compare_upstream(a: &str, b: &str) -> Ordering {
        let mut ai = a.split('.');
        let mut bi = b.split('.');
        loop {
            match (ai.next(), bi.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(x), Some(y)) => {
                    let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                        (Ok(xn), Ok(yn)) => xn.cmp(&yn),
                        _ => x.cmp(y),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        Self::compare_upstream(&self.upstream, &other.upstream)
            .then_with(|| self.source_count.cmp(&other.source_count))
            .then_with(|| self.build_count.unwrap_or(0).cmp(&other.build_count.unwrap_or(0)))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.upstream, self.source_count)?;
        if let Some(b) = self.build_count {
            write!(f, "-{b}")?;
        }
        Ok(())
    }
}

impl FromStr for Revision {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Revision::parse(s)
    }
}

/// A full, parsed Conary version: a branch (label chain) plus a trailing
/// revision and the timestamp of the build that produced it.
#[derive(Debug, Clone)]
pub struct Version {
    branch: Branch,
    revision: Revision,
    final_timestamp: f64,
}

impl Version {
    pub fn new(branch: Branch, revision: Revision, final_timestamp: f64) -> Self {
        Self {
            branch,
            revision,
            final_timestamp,
        }
    }

    /// Parse `/label1/.../labelN/revision[@timestamp]`. The optional
    /// `@timestamp` suffix is peeled off the trailing revision segment
    /// only, never off the whole string — labels themselves contain
    /// `@` (`host@ns:tag`), so splitting on the last `@` in `s` would
    /// instead cut into the final label whenever no timestamp is
    /// present.
    pub fn parse(s: &str) -> Result<Self> {
        if !s.starts_with('/') {
            return Err(Error::parse(format!(
                "version '{s}' must be a full version starting with '/'"
            )));
        }
        let segments: Vec<&str> = s[1..].split('/').filter(|p| !p.is_empty()).collect();
        if segments.len() < 2 {
            return Err(Error::parse(format!(
                "version '{s}' needs at least one label and a revision"
            )));
        }
        let (last, label_strs) = segments.split_last().unwrap();
        let (revision_str, timestamp) = match last.rsplit_once('@') {
            Some((r, ts)) => (
                r,
                ts.parse::<f64>()
                    .map_err(|e| Error::parse(format!("invalid timestamp '{ts}': {e}")))?,
            ),
            None => (*last, 0.0),
        };
        let labels = label_strs
            .iter()
            .map(|l| Label::parse(l).map_err(|e| Error::parse(e.to_string())))
            .collect::<Result<Vec<_>>>()?;
        let branch = Branch::new(labels).map_err(|e| Error::parse(e.to_string()))?;
        let revision = Revision::parse(revision_str)?;

        Ok(Self {
            branch,
            revision,
            final_timestamp: timestamp,
        })
    }

    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    pub fn trailing_label(&self) -> &Label {
        self.branch.label()
    }

    pub fn trailing_revision(&self) -> &Revision {
        &self.revision
    }

    pub fn final_timestamp(&self) -> f64 {
        self.final_timestamp
    }

    /// The version at the point this one shadowed/branched from, if this
    /// version's branch has an ancestor branch.
    pub fn parent(&self) -> Option<Version> {
        self.branch.parent().map(|parent_branch| Version {
            branch: parent_branch,
            revision: self.revision.clone(),
            final_timestamp: self.final_timestamp,
        })
    }

    /// Reversible frozen form used as a DB key and on the wire.
    pub fn freeze(&self) -> String {
        format!("{}/{}@{}", self.branch, self.revision, self.final_timestamp)
    }

    pub fn thaw(s: &str) -> Result<Self> {
        Version::parse(s)
    }

    /// True if `self` and `other` share the same branch.
    pub fn on_same_branch(&self, other: &Version) -> bool {
        self.branch == other.branch
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.branch == other.branch
            && self.revision == other.revision
            && self.final_timestamp == other.final_timestamp
    }
}
impl Eq for Version {}

impl Ord for Version {
    /// Same-branch versions compare by revision, breaking ties on
    /// `finalTimestamp` (distinct rebuilds of an identical revision).
    /// Versions on different branches are ordered by `finalTimestamp`,
    /// mirroring how the store orders nodes that never share a branch.
    fn cmp(&self, other: &Self) -> Ordering {
        if self.branch == other.branch {
            self.revision
                .cmp(&other.revision)
                .then_with(|| self.final_timestamp.partial_cmp(&other.final_timestamp).unwrap_or(Ordering::Equal))
        } else {
            self.final_timestamp
                .partial_cmp(&other.final_timestamp)
                .unwrap_or(Ordering::Equal)
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.branch, self.revision)
    }
}

impl FromStr for Version {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_parse_source_only() {
        let r = Revision::parse("1.0-1").unwrap();
        assert_eq!(r.upstream, "1.0");
        assert_eq!(r.source_count, 1);
        assert_eq!(r.build_count, None);
    }

    #[test]
    fn test_revision_parse_full() {
        let r = Revision::parse("1.0-1-2").unwrap();
        assert_eq!(r.upstream, "1.0");
        assert_eq!(r.source_count, 1);
        assert_eq!(r.build_count, Some(2));
    }

    #[test]
    fn test_revision_ordering() {
        let a = Revision::parse("1.0-1-1").unwrap();
        let b = Revision::parse("1.0-1-2").unwrap();
        let c = Revision::parse("1.1-1-1").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_version_roundtrip() {
        let v = Version::parse("/example.com@ns:1/1.0-1-1").unwrap();
        assert_eq!(v.trailing_label().to_string(), "example.com@ns:1");
        assert_eq!(v.trailing_revision().to_string(), "1.0-1-1");
        let frozen = v.freeze();
        let thawed = Version::thaw(&frozen).unwrap();
        assert_eq!(v, thawed);
    }

    #[test]
    fn test_version_compare_same_branch() {
        let a = Version::parse("/example.com@ns:1/1.0-1-1").unwrap();
        let b = Version::parse("/example.com@ns:1/1.0-1-2").unwrap();
        let c = Version::parse("/example.com@ns:1/1.1-1-1").unwrap();
        assert!(a < b);
        assert!(b < c);
        assert!(a.on_same_branch(&c));
    }

    #[test]
    fn test_version_parent_shadow() {
        let v = Version::parse("/host@ns:1/host@ns:shadow/1.0-1-1").unwrap();
        let parent = v.parent().unwrap();
        assert_eq!(parent.branch().to_string(), "/host@ns:1");
        assert_eq!(parent.trailing_revision(), v.trailing_revision());
    }

    #[test]
    fn test_version_parse_rejects_malformed() {
        assert!(Version::parse("1.0-1-1").is_err());
        assert!(Version::parse("/host@ns:1").is_err());
    }
}
