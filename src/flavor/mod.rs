// src/flavor/mod.rs

//! Flavor specification parsing, scoring, and matching.
//!
//! A flavor is a set of named dependency-class assertions with an
//! orientation: required (no prefix), prohibited (`!`), preferred (`~`),
//! or preferred-against (`~!`). Architecture selections use the `is:`
//! pseudo-class. Syntax: `[ssl, !debug, ~vmware, is: x86_64]`.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

pub const NO_MATCH: i32 = i32::MIN;

/// Orientation of a single flavor assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlavorOp {
    /// Required: the system must have this feature (no prefix).
    Required,
    /// Prohibited: the system must NOT have this feature (`!` prefix).
    Not,
    /// Preferred: soft preference for having it (`~` prefix).
    Prefers,
    /// Preferred against: soft preference for not having it (`~!` prefix).
    PrefersNot,
}

impl FlavorOp {
    pub fn as_prefix(&self) -> &'static str {
        match self {
            Self::Required => "",
            Self::Not => "!",
            Self::Prefers => "~",
            Self::PrefersNot => "~!",
        }
    }

    pub fn parse_with_name(s: &str) -> Result<(Self, &str)> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::parse("empty flavor item"));
        }
        let (op, rest) = if let Some(rest) = s.strip_prefix("~!") {
            (Self::PrefersNot, rest)
        } else if let Some(rest) = s.strip_prefix('~') {
            (Self::Prefers, rest)
        } else if let Some(rest) = s.strip_prefix('!') {
            (Self::Not, rest)
        } else {
            (Self::Required, s)
        };
        let name = rest.trim();
        if name.is_empty() {
            return Err(Error::parse(format!("missing name after operator in '{s}'")));
        }
        Ok((op, name))
    }
}

/// A single flavor item: an orientation plus a feature name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlavorItem {
    pub op: FlavorOp,
    pub name: String,
}

impl FlavorItem {
    pub fn new(op: FlavorOp, name: impl Into<String>) -> Self {
        Self { op, name: name.into() }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (op, name) = FlavorOp::parse_with_name(s)?;
        Ok(Self::new(op, name))
    }
}

impl fmt::Display for FlavorItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_prefix(), self.name)
    }
}

/// `is: x86 x86_64` style architecture list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct ArchSpec {
    pub architectures: Vec<String>,
}

impl ArchSpec {
    pub fn contains(&self, arch: &str) -> bool {
        self.architectures.iter().any(|a| a == arch)
    }
}

impl fmt::Display for ArchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "is: {}", self.architectures.join(" "))
    }
}

/// A complete flavor: `[ssl, !debug, is: x86_64]`. An empty flavor
/// satisfies every spec and scores 0.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Flavor {
    items: Vec<FlavorItem>,
    arch: Option<ArchSpec>,
}

impl Flavor {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(mut items: Vec<FlavorItem>, mut arch: Option<ArchSpec>) -> Self {
        items.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(a) = &mut arch {
            a.architectures.sort();
            a.architectures.dedup();
        }
        Self { items, arch }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.arch.is_none()
    }

    pub fn items(&self) -> &[FlavorItem] {
        &self.items
    }

    pub fn arch(&self) -> Option<&ArchSpec> {
        self.arch.as_ref()
    }

    fn find(&self, name: &str) -> Option<&FlavorItem> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::empty());
        }
        let inner = if s.starts_with('[') && s.ends_with(']') {
            &s[1..s.len() - 1]
        } else {
            s
        };
        if inner.trim().is_empty() {
            return Ok(Self::empty());
        }

        let mut items = Vec::new();
        let mut arch = None;
        let mut remaining = inner;
        while !remaining.is_empty() {
            remaining = remaining.trim();
            if let Some(rest) = remaining.strip_prefix("is:") {
                let end = remaining.find(',').unwrap_or(remaining.len());
                let arch_str = rest[..end.saturating_sub(3)].trim();
                let architectures: Vec<String> = arch_str.split_whitespace().map(String::from).collect();
                if architectures.is_empty() {
                    return Err(Error::parse("empty architecture spec after 'is:'"));
                }
                arch = Some(ArchSpec { architectures });
                remaining = if end < remaining.len() { &remaining[end + 1..] } else { "" };
            } else {
                let end = remaining.find(',').unwrap_or(remaining.len());
                let item_str = remaining[..end].trim();
                if !item_str.is_empty() {
                    items.push(FlavorItem::parse(item_str)?);
                }
                remaining = if end < remaining.len() { &remaining[end + 1..] } else { "" };
            }
        }
        Ok(Self::new(items, arch))
    }

    /// Stable binary (byte) form used as a DB key; sorted so that
    /// semantically-equal flavors freeze identically.
    pub fn freeze(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn thaw(bytes: &[u8]) -> Result<Self> {
        let s = std::str::from_utf8(bytes).map_err(|e| Error::parse(e.to_string()))?;
        Flavor::parse(s)
    }

    /// True if `concrete` satisfies every assertion in `self` (the spec).
    pub fn satisfies(&self, concrete: &Flavor) -> bool {
        if let Some(spec_arch) = &self.arch {
            match &concrete.arch {
                Some(concrete_arch) => {
                    if !spec_arch.architectures.iter().any(|a| concrete_arch.contains(a)) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        for item in &self.items {
            let present = concrete.find(&item.name).is_some();
            match item.op {
                FlavorOp::Required => {
                    if !present {
                        return false;
                    }
                }
                FlavorOp::Not => {
                    if present {
                        return false;
                    }
                }
                // Soft preferences never block satisfaction.
                FlavorOp::Prefers | FlavorOp::PrefersNot => {}
            }
        }
        true
    }

    /// Score of `concrete` against `self` (the spec); higher is better,
    /// `NO_MATCH` if `concrete` does not satisfy `self`.
    pub fn score(&self, concrete: &Flavor) -> i32 {
        if !self.satisfies(concrete) {
            return NO_MATCH;
        }
        let mut score = 0;
        if let Some(spec_arch) = &self.arch {
            if let Some(concrete_arch) = &concrete.arch {
                score += spec_arch
                    .architectures
                    .iter()
                    .filter(|a| concrete_arch.contains(a))
                    .count() as i32
                    * 10;
            }
        }
        for item in &self.items {
            let present = concrete.find(&item.name).is_some();
            match item.op {
                FlavorOp::Required | FlavorOp::Not => score += 10,
                FlavorOp::Prefers => {
                    if present {
                        score += 5;
                    }
                }
                FlavorOp::PrefersNot => {
                    if !present {
                        score += 5;
                    }
                }
            }
        }
        score
    }

    /// Combine `base` with `layer`, where `layer` dominates on overlap
    /// (its assertions for a shared name replace `base`'s).
    pub fn r#override(base: &Flavor, layer: &Flavor) -> Flavor {
        let mut items = base.items.clone();
        for layer_item in &layer.items {
            if let Some(pos) = items.iter().position(|i| i.name == layer_item.name) {
                items[pos] = layer_item.clone();
            } else {
                items.push(layer_item.clone());
            }
        }
        let arch = match (&base.arch, &layer.arch) {
            (_, Some(a)) => Some(a.clone()),
            (Some(a), None) => Some(a.clone()),
            (None, None) => None,
        };
        Flavor::new(items, arch)
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts: Vec<String> = self.items.iter().map(|i| i.to_string()).collect();
        if let Some(arch) = &self.arch {
            parts.push(arch.to_string());
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

impl FromStr for Flavor {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Flavor::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_flavor_satisfies_everything() {
        let empty = Flavor::empty();
        let concrete = Flavor::parse("[ssl, is: x86_64]").unwrap();
        assert!(empty.satisfies(&concrete));
        assert_eq!(empty.score(&concrete), 0);
    }

    #[test]
    fn test_parse_roundtrip() {
        let f = Flavor::parse("[ssl, !debug, is: x86_64]").unwrap();
        let frozen = f.freeze();
        let thawed = Flavor::thaw(&frozen).unwrap();
        assert_eq!(f, thawed);
    }

    #[test]
    fn test_satisfies_required_and_prohibited() {
        let spec = Flavor::parse("[ssl, !debug]").unwrap();
        let good = Flavor::parse("[ssl]").unwrap();
        let bad = Flavor::parse("[ssl, debug]").unwrap();
        assert!(spec.satisfies(&good));
        assert!(!spec.satisfies(&bad));
    }

    #[test]
    fn test_best_flavor_scoring() {
        // S3: is:x86 scores higher than is:x86_64 against an is:x86 spec.
        let spec = Flavor::parse("is: x86").unwrap();
        let x86 = Flavor::parse("is: x86").unwrap();
        let x86_64 = Flavor::parse("is: x86_64").unwrap();
        assert!(spec.satisfies(&x86));
        assert!(!spec.satisfies(&x86_64));
        assert_eq!(spec.score(&x86_64), NO_MATCH);
        assert!(spec.score(&x86) > 0);
    }

    #[test]
    fn test_override_layer_dominates() {
        let base = Flavor::parse("[ssl, !debug]").unwrap();
        let layer = Flavor::parse("[debug]").unwrap();
        let merged = Flavor::r#override(&base, &layer);
        assert!(merged.satisfies(&Flavor::parse("[ssl, debug]").unwrap()));
    }
}
