// src/config.rs

//! Typed configuration primitives and the repository's own config
//! file, loaded from TOML the way the teacher's server config does,
//! but built from the `Cfg*` type family conary's `cfgtypes` module
//! defines: each wraps a plain Rust type with the parse/format rules
//! (path expansion, bool spelling, enum case-insensitivity, regex
//! compilation) the original line-oriented config format relied on.

use crate::error::{Error, Result};
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// `true`/`false`/`1`/`0`, case-insensitively — conary's `CfgBool`
/// accepted both spellings in config files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CfgBool(pub bool);

impl CfgBool {
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "0" | "false" => Ok(CfgBool(false)),
            "1" | "true" => Ok(CfgBool(true)),
            other => Err(Error::parse(format!("expected true or false, got '{other}'"))),
        }
    }
}

impl<'de> Deserialize<'de> for CfgBool {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bool(bool),
            Str(String),
        }
        match Repr::deserialize(d)? {
            Repr::Bool(b) => Ok(CfgBool(b)),
            Repr::Str(s) => CfgBool::parse_str(&s).map_err(de::Error::custom),
        }
    }
}

/// A path with `~` and environment variables expanded at parse time,
/// keeping the original string around for `format()`-style
/// round-tripping back to a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgPath {
    expanded: PathBuf,
    original: String,
}

impl CfgPath {
    pub fn parse_str(s: &str) -> Result<Self> {
        let expanded_str = expand_env(&expand_home(s));
        Ok(CfgPath { expanded: PathBuf::from(expanded_str), original: s.to_string() })
    }

    pub fn as_path(&self) -> &std::path::Path {
        &self.expanded
    }

    /// The original, unexpanded string — what `format()` writes back.
    pub fn original(&self) -> &str {
        &self.original
    }
}

fn expand_home(s: &str) -> String {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    s.to_string()
}

fn expand_env(s: &str) -> String {
    let mut out = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            out.push_str(&std::env::var(&name).unwrap_or_default());
        } else {
            out.push(c);
        }
    }
    out
}

impl<'de> Deserialize<'de> for CfgPath {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        CfgPath::parse_str(&s).map_err(de::Error::custom)
    }
}

impl fmt::Display for CfgPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// A plain integer option; kept as its own type (rather than a bare
/// `i64` field) so every config type in this family shares the same
/// `parse_str` entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CfgInt(pub i64);

impl CfgInt {
    pub fn parse_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(CfgInt)
            .map_err(|_| Error::parse("expected an integer"))
    }
}

/// Case-insensitive enumerated option over any `T: FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgEnum<T>(pub T);

impl<T: FromStr> CfgEnum<T> {
    pub fn parse_str(s: &str) -> Result<Self>
    where
        T::Err: fmt::Display,
    {
        T::from_str(&s.to_lowercase())
            .map(CfgEnum)
            .map_err(|e| Error::parse(format!("'{s}' is not a valid value: {e}")))
    }
}

impl<'de, T: FromStr> Deserialize<'de> for CfgEnum<T>
where
    T::Err: fmt::Display,
{
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        CfgEnum::parse_str(&s).map_err(de::Error::custom)
    }
}

/// A compiled regular expression, stored alongside the source text it
/// was compiled from so the config can be written back unchanged.
#[derive(Debug, Clone)]
pub struct CfgRegExp {
    source: String,
    compiled: Regex,
}

impl CfgRegExp {
    pub fn parse_str(s: &str) -> Result<Self> {
        let compiled = Regex::new(s).map_err(|e| Error::parse(e.to_string()))?;
        Ok(CfgRegExp { source: s.to_string(), compiled })
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.compiled.is_match(s)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PartialEq for CfgRegExp {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
impl Eq for CfgRegExp {}

impl<'de> Deserialize<'de> for CfgRegExp {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        CfgRegExp::parse_str(&s).map_err(de::Error::custom)
    }
}

/// A list parsed from whitespace-separated tokens on one line, as
/// opposed to `CfgList`'s one-value-appended-per-directive style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgLineList<T>(pub Vec<T>);

impl<T> CfgLineList<T> {
    pub fn parse_line(s: &str, item: impl Fn(&str) -> Result<T>) -> Result<Self> {
        let items = s.split_whitespace().map(item).collect::<Result<Vec<_>>>()?;
        Ok(CfgLineList(items))
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for CfgLineList<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        Vec::deserialize(d).map(CfgLineList)
    }
}

/// A list accumulated one `append`-style directive at a time in the
/// original format; in TOML this is just a native array, kept here
/// under its own name for symmetry with `CfgLineList`/`CfgDict`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CfgList<T>(pub Vec<T>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for CfgList<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        Vec::deserialize(d).map(CfgList)
    }
}

/// `key = value` directives collected into a map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CfgDict<V>(pub HashMap<String, V>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for CfgDict<V> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        HashMap::deserialize(d).map(CfgDict)
    }
}

/// `CfgDict` whose values are restricted to a fixed enumeration, e.g.
/// `role = admin|mirror|readonly`.
pub type CfgEnumDict<T> = CfgDict<CfgEnum<T>>;

/// A list of compiled regular expressions, e.g. the set of patterns a
/// mirror configuration excludes from sync.
pub type CfgRegExpList = CfgList<CfgRegExp>;

/// A directive whose only effect is invoking a callback — used for
/// options that used to exist and now just warn, or that trigger a
/// side effect (reloading a cert bundle) instead of storing a value.
pub struct CfgCallBack<F: Fn(&str) -> Result<()>> {
    callback: F,
}

impl<F: Fn(&str) -> Result<()>> CfgCallBack<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }

    pub fn invoke(&self, value: &str) -> Result<()> {
        (self.callback)(value)
    }
}

/// Where troves are archived on disk, and which role mirrors into
/// this repository — the `[repository]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositorySection {
    /// The label this repository serves, e.g. `example.com@ns:1`.
    pub label: String,
    /// SQLite database path.
    pub db_path: CfgPath,
    /// Where file-stream content blobs are archived.
    #[serde(default = "default_contents_dir")]
    pub contents_dir: CfgPath,
    /// Roles allowed to mirror from this repository.
    #[serde(default)]
    pub mirror_roles: CfgLineList<String>,
    /// Require every committed trove to carry a valid signature.
    #[serde(default)]
    pub require_signatures: CfgBool,
}

fn default_contents_dir() -> CfgPath {
    CfgPath::parse_str("/var/lib/conary/contents").unwrap()
}

/// `[security]`: patterns excluded from anonymous access regardless
/// of role permissions.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecuritySection {
    #[serde(default)]
    pub deny_anonymous_write: CfgBool,
    #[serde(default)]
    pub entitlement_required_patterns: CfgRegExpList,
}

/// `[migration]`: how much progress chatter a migration run emits.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: CfgInt,
}

fn default_batch_size() -> CfgInt {
    CfgInt(1000)
}

impl Default for MigrationSection {
    fn default() -> Self {
        Self { batch_size: default_batch_size() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub repository: RepositorySection,
    #[serde(default)]
    pub security: SecuritySection,
    #[serde(default)]
    pub migration: MigrationSection,
}

impl RepositoryConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::parse(format!("reading config file '{}': {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::parse(format!("parsing config: {e}")))
    }
}
