// src/filestream.rs

//! FileStream: the frozen, on-disk representation of a single file's
//! metadata (everything about a file except its path and the trove it
//! belongs to).
//!
//! The frozen form is a concatenation of typed, length-prefixed
//! sub-streams so that an unrecognized tag can be skipped rather than
//! failing the whole parse, and so `fileStreamIsDiff` can tell an
//! absolute stream from a diff stream by looking at the first tag
//! alone.

use crate::deps::DependencySet;
use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Hash, HashAlgorithm};
use std::fmt;

/// Tag byte identifying a sub-stream's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum StreamTag {
    Inode = 1,
    Tags = 2,
    Provides = 3,
    Requires = 4,
    Contents = 5,
    /// Marks the whole frozen blob as a diff rather than an absolute
    /// stream; carries no payload of its own.
    Diff = 0xff,
}

impl StreamTag {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Self::Inode),
            2 => Ok(Self::Tags),
            3 => Ok(Self::Provides),
            4 => Ok(Self::Requires),
            5 => Ok(Self::Contents),
            0xff => Ok(Self::Diff),
            other => Err(Error::parse(format!("unknown file-stream sub-stream tag {other}"))),
        }
    }
}

/// Inode-level metadata: permissions, ownership, modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeInfo {
    pub perms: u32,
    pub owner: String,
    pub group: String,
    pub mtime: i64,
}

impl InodeInfo {
    fn freeze(&self) -> Vec<u8> {
        format!("{}\n{}\n{}\n{}", self.perms, self.owner, self.group, self.mtime).into_bytes()
    }

    fn thaw(bytes: &[u8]) -> Result<Self> {
        let s = std::str::from_utf8(bytes).map_err(|e| Error::parse(e.to_string()))?;
        let mut lines = s.splitn(4, '\n');
        let perms = lines
            .next()
            .ok_or_else(|| Error::parse("inode stream missing perms"))?
            .parse::<u32>()
            .map_err(|e| Error::parse(format!("invalid perms: {e}")))?;
        let owner = lines.next().unwrap_or_default().to_string();
        let group = lines.next().unwrap_or_default().to_string();
        let mtime = lines
            .next()
            .ok_or_else(|| Error::parse("inode stream missing mtime"))?
            .parse::<i64>()
            .map_err(|e| Error::parse(format!("invalid mtime: {e}")))?;
        Ok(Self { perms, owner, group, mtime })
    }
}

/// What kind of thing this file is and what content it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentsInfo {
    Regular { size: u64, sha1: Hash },
    Symlink { target: String },
    Directory,
    Device { major: u32, minor: u32, is_block: bool },
}

impl ContentsInfo {
    fn freeze(&self) -> Vec<u8> {
        match self {
            Self::Regular { size, sha1 } => format!("f {} {}", size, sha1.as_str()).into_bytes(),
            Self::Symlink { target } => format!("l {}", target).into_bytes(),
            Self::Directory => b"d".to_vec(),
            Self::Device { major, minor, is_block } => {
                format!("{} {} {}", if *is_block { "b" } else { "c" }, major, minor).into_bytes()
            }
        }
    }

    fn thaw(bytes: &[u8]) -> Result<Self> {
        let s = std::str::from_utf8(bytes).map_err(|e| Error::parse(e.to_string()))?;
        let mut parts = s.splitn(2, ' ');
        match parts.next() {
            Some("f") => {
                let rest = parts.next().ok_or_else(|| Error::parse("regular contents missing size/sha1"))?;
                let (size_str, sha1_str) = rest
                    .split_once(' ')
                    .ok_or_else(|| Error::parse("regular contents missing sha1"))?;
                let size = size_str.parse::<u64>().map_err(|e| Error::parse(e.to_string()))?;
                let sha1 = Hash::new(HashAlgorithm::Sha1, sha1_str).map_err(|e| Error::parse(e.to_string()))?;
                Ok(Self::Regular { size, sha1 })
            }
            Some("l") => Ok(Self::Symlink {
                target: parts.next().unwrap_or_default().to_string(),
            }),
            Some("d") => Ok(Self::Directory),
            Some(kind @ ("b" | "c")) => {
                let rest = parts.next().ok_or_else(|| Error::parse("device contents missing major/minor"))?;
                let (major_str, minor_str) = rest
                    .split_once(' ')
                    .ok_or_else(|| Error::parse("device contents missing minor"))?;
                let major = major_str.parse::<u32>().map_err(|e| Error::parse(e.to_string()))?;
                let minor = minor_str.parse::<u32>().map_err(|e| Error::parse(e.to_string()))?;
                Ok(Self::Device { major, minor, is_block: kind == "b" })
            }
            _ => Err(Error::parse(format!("unrecognized contents tag in '{s}'"))),
        }
    }
}

/// A single file's full metadata, as stored keyed by `fileId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStream {
    pub inode: InodeInfo,
    pub tags: Vec<String>,
    pub provides: DependencySet,
    pub requires: DependencySet,
    pub contents: ContentsInfo,
}

fn write_substream(out: &mut Vec<u8>, tag: StreamTag, payload: &[u8]) {
    out.push(tag as u8);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

impl FileStream {
    pub fn new(
        inode: InodeInfo,
        tags: Vec<String>,
        provides: DependencySet,
        requires: DependencySet,
        contents: ContentsInfo,
    ) -> Self {
        Self { inode, tags, provides, requires, contents }
    }

    /// Length-prefixed concatenation of typed sub-streams, in fixed
    /// order: inode, tags, provides, requires, contents.
    pub fn freeze(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_substream(&mut out, StreamTag::Inode, &self.inode.freeze());
        write_substream(&mut out, StreamTag::Tags, self.tags.join("\n").as_bytes());
        write_substream(&mut out, StreamTag::Provides, self.provides.freeze().as_bytes());
        write_substream(&mut out, StreamTag::Requires, self.requires.freeze().as_bytes());
        write_substream(&mut out, StreamTag::Contents, &self.contents.freeze());
        out
    }

    pub fn thaw(bytes: &[u8]) -> Result<Self> {
        let mut inode = None;
        let mut tags = Vec::new();
        let mut provides = DependencySet::new();
        let mut requires = DependencySet::new();
        let mut contents = None;

        let mut cursor = bytes;
        while !cursor.is_empty() {
            if cursor.len() < 5 {
                return Err(Error::parse("truncated file-stream sub-stream header"));
            }
            let tag = StreamTag::from_byte(cursor[0])?;
            let len = u32::from_le_bytes(cursor[1..5].try_into().unwrap()) as usize;
            cursor = &cursor[5..];
            if cursor.len() < len {
                return Err(Error::parse("truncated file-stream sub-stream payload"));
            }
            let payload = &cursor[..len];
            cursor = &cursor[len..];

            match tag {
                StreamTag::Inode => inode = Some(InodeInfo::thaw(payload)?),
                StreamTag::Tags => {
                    let s = std::str::from_utf8(payload).map_err(|e| Error::parse(e.to_string()))?;
                    tags = s.lines().filter(|l| !l.is_empty()).map(String::from).collect();
                }
                StreamTag::Provides => {
                    let s = std::str::from_utf8(payload).map_err(|e| Error::parse(e.to_string()))?;
                    provides = DependencySet::thaw(s)?;
                }
                StreamTag::Requires => {
                    let s = std::str::from_utf8(payload).map_err(|e| Error::parse(e.to_string()))?;
                    requires = DependencySet::thaw(s)?;
                }
                StreamTag::Contents => contents = Some(ContentsInfo::thaw(payload)?),
                StreamTag::Diff => {
                    return Err(Error::parse("cannot thaw a diff stream as an absolute FileStream"));
                }
            }
        }

        Ok(Self {
            inode: inode.ok_or_else(|| Error::parse("file-stream missing inode sub-stream"))?,
            tags,
            provides,
            requires,
            contents: contents.ok_or_else(|| Error::parse("file-stream missing contents sub-stream"))?,
        })
    }

    /// SHA-1 digest of the frozen stream, used as `fileId` once
    /// combined with the owning `pathId`.
    pub fn stream_digest(&self) -> Hash {
        hash_bytes(HashAlgorithm::Sha1, &self.freeze())
    }
}

/// True if `bytes` is a diff-form frozen stream rather than an
/// absolute one, by inspecting the first sub-stream's tag.
pub fn file_stream_is_diff(bytes: &[u8]) -> bool {
    bytes.first().map(|b| *b == StreamTag::Diff as u8).unwrap_or(false)
}

impl fmt::Display for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.contents {
            ContentsInfo::Regular { size, sha1 } => write!(f, "f {} {:o} {}", size, self.inode.perms, sha1),
            ContentsInfo::Symlink { target } => write!(f, "l -> {target}"),
            ContentsInfo::Directory => write!(f, "d {:o}", self.inode.perms),
            ContentsInfo::Device { major, minor, is_block } => {
                write!(f, "{} {major}:{minor}", if *is_block { "b" } else { "c" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> FileStream {
        FileStream::new(
            InodeInfo { perms: 0o644, owner: "root".into(), group: "root".into(), mtime: 1_700_000_000 },
            vec!["config".to_string()],
            DependencySet::new(),
            DependencySet::new(),
            ContentsInfo::Regular { size: 128, sha1: hash_bytes(HashAlgorithm::Sha1, b"contents") },
        )
    }

    #[test]
    fn test_freeze_thaw_roundtrip() {
        let stream = sample_stream();
        let frozen = stream.freeze();
        let thawed = FileStream::thaw(&frozen).unwrap();
        assert_eq!(stream, thawed);
    }

    #[test]
    fn test_is_diff_false_for_absolute() {
        let stream = sample_stream();
        assert!(!file_stream_is_diff(&stream.freeze()));
    }

    #[test]
    fn test_is_diff_true_for_diff_tag() {
        let mut bytes = Vec::new();
        write_substream(&mut bytes, StreamTag::Diff, b"");
        assert!(file_stream_is_diff(&bytes));
    }

    #[test]
    fn test_symlink_and_directory_contents() {
        let symlink = ContentsInfo::Symlink { target: "/usr/bin/foo".into() };
        assert_eq!(ContentsInfo::thaw(&symlink.freeze()).unwrap(), symlink);
        assert_eq!(ContentsInfo::thaw(&ContentsInfo::Directory.freeze()).unwrap(), ContentsInfo::Directory);
    }

    #[test]
    fn test_stream_digest_changes_with_contents() {
        let a = sample_stream();
        let mut b = sample_stream();
        b.inode.mtime += 1;
        assert_ne!(a.stream_digest(), b.stream_digest());
    }
}
