// src/deps/mod.rs

//! Dependency algebra: classes, flag sets, and satisfaction rules.
//!
//! A dependency is `class: name(flag1 flag2 ...)`. Classes are grouped
//! into the ecosystem-neutral set Conary uses at the trove level —
//! `soname`, `trove`, `file`, `abi`, `use`, `is` — rather than the
//! language-specific ones a client-side resolver might add on top.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;

/// A dependency class; determines how flags are interpreted at match time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DepClass {
    /// Shared library: `soname: libssl.so.3(abi)`.
    Soname,
    /// Inter-trove reference: `trove: foo:runtime`.
    Trove,
    /// A specific path must exist: `file: /usr/bin/python3`.
    File,
    /// ABI compatibility tag: `abi: x86_64-linux-gnu`.
    Abi,
    /// Build/runtime feature flag: `use: ssl`.
    Use,
    /// Architecture/instruction-set assertion: `is: x86_64`.
    Is,
}

impl DepClass {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Soname => "soname",
            Self::Trove => "trove",
            Self::File => "file",
            Self::Abi => "abi",
            Self::Use => "use",
            Self::Is => "is",
        }
    }

    pub fn from_prefix(s: &str) -> Result<Self> {
        match s {
            "soname" => Ok(Self::Soname),
            "trove" => Ok(Self::Trove),
            "file" => Ok(Self::File),
            "abi" => Ok(Self::Abi),
            "use" => Ok(Self::Use),
            "is" => Ok(Self::Is),
            other => Err(Error::parse(format!("unknown dependency class '{other}'"))),
        }
    }
}

impl fmt::Display for DepClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// A single `class: name(flags...)` assertion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dependency {
    pub class: DepClass,
    pub name: String,
    pub flags: BTreeSet<String>,
}

impl Dependency {
    pub fn new(class: DepClass, name: impl Into<String>, flags: impl IntoIterator<Item = String>) -> Self {
        Self {
            class,
            name: name.into(),
            flags: flags.into_iter().collect(),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (class_str, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::parse(format!("dependency '{s}' missing ':' after class")))?;
        let class = DepClass::from_prefix(class_str.trim())?;
        let rest = rest.trim();
        let (name, flags) = match rest.split_once('(') {
            Some((name, flag_str)) => {
                let flag_str = flag_str.strip_suffix(')').ok_or_else(|| {
                    Error::parse(format!("dependency '{s}' has unterminated flag list"))
                })?;
                let flags = flag_str
                    .split_whitespace()
                    .map(String::from)
                    .collect::<BTreeSet<_>>();
                (name.trim().to_string(), flags)
            }
            None => (rest.to_string(), BTreeSet::new()),
        };
        if name.is_empty() {
            return Err(Error::parse(format!("dependency '{s}' has an empty name")));
        }
        Ok(Self { class, name, flags })
    }

    /// Class-specific satisfaction: does `provided` satisfy this
    /// (required) dependency?
    ///
    /// - `soname`: name and flags must match exactly (ABI tags matter).
    /// - `trove`: name match only; flags are informational.
    /// - everything else (`file`, `abi`, `use`, `is`): the required
    ///   flags must be a subset of the provided flags (subsumption).
    pub fn satisfies(&self, provided: &Dependency) -> bool {
        if self.class != provided.class || self.name != provided.name {
            return false;
        }
        match self.class {
            DepClass::Soname => self.flags == provided.flags,
            DepClass::Trove => true,
            DepClass::File | DepClass::Abi | DepClass::Use | DepClass::Is => {
                self.flags.is_subset(&provided.flags)
            }
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.name)?;
        if !self.flags.is_empty() {
            write!(f, "({})", self.flags.iter().cloned().collect::<Vec<_>>().join(" "))?;
        }
        Ok(())
    }
}

/// An ordered set of dependencies, grouped by class on freeze.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencySet {
    deps: BTreeSet<Dependency>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_deps(deps: impl IntoIterator<Item = Dependency>) -> Self {
        Self {
            deps: deps.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, dep: Dependency) {
        self.deps.insert(dep);
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.deps.iter()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    /// `self − other`: dependencies in `self` with no satisfying member
    /// in `other`.
    pub fn difference(&self, other: &DependencySet) -> DependencySet {
        DependencySet {
            deps: self
                .deps
                .iter()
                .filter(|d| !other.deps.iter().any(|o| d.satisfies(o)))
                .cloned()
                .collect(),
        }
    }

    pub fn union(&self, other: &DependencySet) -> DependencySet {
        DependencySet {
            deps: self.deps.union(&other.deps).cloned().collect(),
        }
    }

    /// True if every dependency in `self` (required) is satisfied by
    /// some dependency in `provided`.
    pub fn satisfies(&self, provided: &DependencySet) -> bool {
        self.deps
            .iter()
            .all(|req| provided.deps.iter().any(|p| req.satisfies(p)))
    }

    /// Newline-delimited, class-grouped freeze form.
    pub fn freeze(&self) -> String {
        let mut out = String::new();
        let mut current_class = None;
        for dep in &self.deps {
            if current_class != Some(dep.class) {
                if current_class.is_some() {
                    out.push('\n');
                }
                out.push_str(dep.class.prefix());
                out.push('\n');
                current_class = Some(dep.class);
            }
            out.push_str(&dep.name);
            if !dep.flags.is_empty() {
                out.push(' ');
                out.push_str(&dep.flags.iter().cloned().collect::<Vec<_>>().join(" "));
            }
            out.push('\n');
        }
        out
    }

    pub fn thaw(s: &str) -> Result<Self> {
        let mut deps = BTreeSet::new();
        let mut class: Option<DepClass> = None;
        for line in s.lines() {
            if line.is_empty() {
                continue;
            }
            if !line.starts_with(char::is_whitespace) && DepClass::from_prefix(line).is_ok() {
                class = Some(DepClass::from_prefix(line)?);
                continue;
            }
            let class = class.ok_or_else(|| Error::parse("dependency entry before any class header"))?;
            let mut parts = line.split_whitespace();
            let name = parts
                .next()
                .ok_or_else(|| Error::parse("empty dependency entry"))?
                .to_string();
            let flags: BTreeSet<String> = parts.map(String::from).collect();
            deps.insert(Dependency { class, name, flags });
        }
        Ok(Self { deps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_parse_and_display() {
        let d = Dependency::parse("soname: libssl.so.3(abi)").unwrap();
        assert_eq!(d.class, DepClass::Soname);
        assert_eq!(d.name, "libssl.so.3");
        assert!(d.flags.contains("abi"));
        assert_eq!(d.to_string(), "soname: libssl.so.3(abi)");
    }

    #[test]
    fn test_soname_requires_exact_flags() {
        let required = Dependency::parse("soname: libssl.so.3(abi)").unwrap();
        let provided_match = Dependency::parse("soname: libssl.so.3(abi)").unwrap();
        let provided_mismatch = Dependency::parse("soname: libssl.so.3").unwrap();
        assert!(required.satisfies(&provided_match));
        assert!(!required.satisfies(&provided_mismatch));
    }

    #[test]
    fn test_trove_matches_by_name_only() {
        let required = Dependency::parse("trove: foo:runtime").unwrap();
        let provided = Dependency::parse("trove: foo:runtime").unwrap();
        assert!(required.satisfies(&provided));
    }

    #[test]
    fn test_use_flag_subsumption() {
        let required = Dependency::parse("use: ssl").unwrap();
        let provided = Dependency::parse("use: ssl(threaded)").unwrap();
        assert!(required.satisfies(&provided));
        let required_more = Dependency::parse("use: ssl(threaded fips)").unwrap();
        assert!(!required_more.satisfies(&provided));
    }

    #[test]
    fn test_set_difference_and_union() {
        let a = DependencySet::from_deps([
            Dependency::parse("trove: foo:runtime").unwrap(),
            Dependency::parse("trove: bar:runtime").unwrap(),
        ]);
        let b = DependencySet::from_deps([Dependency::parse("trove: foo:runtime").unwrap()]);
        let diff = a.difference(&b);
        assert_eq!(diff.len(), 1);
        assert!(diff.iter().next().unwrap().name == "bar:runtime");

        let union = a.union(&b);
        assert_eq!(union.len(), 2);
    }

    #[test]
    fn test_set_satisfies_and_freeze_roundtrip() {
        let required = DependencySet::from_deps([Dependency::parse("soname: libc.so.6").unwrap()]);
        let provided = DependencySet::from_deps([Dependency::parse("soname: libc.so.6").unwrap()]);
        assert!(required.satisfies(&provided));

        let frozen = required.freeze();
        let thawed = DependencySet::thaw(&frozen).unwrap();
        assert_eq!(required, thawed);
    }
}
