// src/diff.rs

//! Diff two trove states into the `NewTroveCs` a changeset carries,
//! fetching file content from the store as needed to build byte-level
//! diffs. The inverse of `Changeset::apply` — grounded in the same
//! file-manifest comparison `clone.py`'s changeset-creation path does.

use crate::changeset::{diff_streams, DepSetEdit, FileChange, DiffContent, NewTroveCs};
use crate::db::store::get_file_contents;
use crate::error::Result;
use crate::trove::Trove;
use rusqlite::Connection;
use std::collections::HashMap;

/// Build the `NewTroveCs` that turns `old` into `new`. `old = None`
/// produces an absolute changeset (everything in `new` is "added").
pub fn diff_troves(conn: &Connection, old: Option<&Trove>, new: &Trove) -> Result<NewTroveCs> {
    let mut cs = match old {
        None => {
            let mut cs = NewTroveCs::new_absolute(new.name.clone(), new.version.clone(), new.flavor.clone());
            cs.new_trove_type = new.trove_type;
            cs
        }
        Some(old) => NewTroveCs {
            name: new.name.clone(),
            old_version: Some(old.version.clone()),
            new_version: new.version.clone(),
            old_flavor: Some(old.flavor.clone()),
            new_flavor: new.flavor.clone(),
            new_trove_type: new.trove_type,
            added_files: Vec::new(),
            changed_files: Vec::new(),
            removed_files: Vec::new(),
            file_diffs: Vec::new(),
            added_sub_troves: Vec::new(),
            removed_sub_troves: Vec::new(),
            provides: DepSetEdit::default(),
            requires: DepSetEdit::default(),
            added_redirects: Vec::new(),
            removed_redirects: Vec::new(),
        },
    };

    let old_files: HashMap<&str, _> = old
        .map(|t| t.file_list().into_iter().map(|f| (f.path_id.as_str(), f)).collect())
        .unwrap_or_default();
    let new_files: HashMap<&str, _> = new.file_list().into_iter().map(|f| (f.path_id.as_str(), f)).collect();

    for (path_id, file) in &new_files {
        match old_files.get(path_id) {
            None => {
                cs.added_files.push((*file).clone());
                let new_bytes = get_file_contents(conn, &file.file_id)?;
                cs.file_diffs.push(FileChange {
                    path_id: path_id.to_string(),
                    old_file_id: None,
                    new_file_id: file.file_id.clone(),
                    content: DiffContent::Absolute(new_bytes),
                });
            }
            Some(old_file) if old_file.file_id != file.file_id => {
                cs.changed_files.push((
                    path_id.to_string(),
                    Some(file.path.clone()).filter(|p| *p != old_file.path),
                    Some(file.file_id.clone()),
                    file.version.clone(),
                ));
                let old_bytes = get_file_contents(conn, &old_file.file_id)?;
                let new_bytes = get_file_contents(conn, &file.file_id)?;
                cs.file_diffs.push(FileChange {
                    path_id: path_id.to_string(),
                    old_file_id: Some(old_file.file_id.clone()),
                    new_file_id: file.file_id.clone(),
                    content: diff_streams(&old_bytes, &new_bytes),
                });
            }
            Some(_) => {}
        }
    }
    for path_id in old_files.keys() {
        if !new_files.contains_key(path_id) {
            cs.removed_files.push(path_id.to_string());
        }
    }

    if let Some(old) = old {
        for sub in new.sub_troves() {
            if !old.sub_troves().contains(sub) {
                cs.added_sub_troves.push(sub.clone());
            }
        }
        for sub in old.sub_troves() {
            if !new.sub_troves().contains(sub) {
                cs.removed_sub_troves.push(sub.clone());
            }
        }
        cs.provides = DepSetEdit {
            added: new.provides.difference(&old.provides).iter().cloned().collect(),
            removed: old.provides.difference(&new.provides).iter().cloned().collect(),
        };
        cs.requires = DepSetEdit {
            added: new.requires.difference(&old.requires).iter().cloned().collect(),
            removed: old.requires.difference(&new.requires).iter().cloned().collect(),
        };
        for r in &new.redirects {
            if !old.redirects.contains(r) {
                cs.added_redirects.push(r.clone());
            }
        }
        for r in &old.redirects {
            if !new.redirects.contains(r) {
                cs.removed_redirects.push(r.clone());
            }
        }
    } else {
        cs.added_sub_troves = new.sub_troves().to_vec();
        cs.provides.added = new.provides.iter().cloned().collect();
        cs.requires.added = new.requires.iter().cloned().collect();
        cs.added_redirects = new.redirects.clone();
    }

    Ok(cs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::SqliteDialect;
    use crate::db::schema;
    use crate::db::store::put_file_stream;
    use crate::flavor::Flavor;
    use crate::hash::{hash_bytes, HashAlgorithm};
    use crate::version::Version;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_schema(&conn, &SqliteDialect).unwrap();
        conn
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_absolute_diff_adds_every_file() {
        let conn = conn();
        let file_id = hash_bytes(HashAlgorithm::Sha1, b"content");
        put_file_stream(&conn, &file_id, b"content").unwrap();
        let mut t = Trove::new("foo:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        t.add_file("P1", "/bin/foo", file_id, v("/example.com@ns:1/1.0-1-1")).unwrap();

        let cs = diff_troves(&conn, None, &t).unwrap();
        assert_eq!(cs.added_files.len(), 1);
        assert!(cs.old_version.is_none());
    }

    #[test]
    fn test_relative_diff_detects_added_and_removed() {
        let conn = conn();
        let a_id = hash_bytes(HashAlgorithm::Sha1, b"a");
        let b_id = hash_bytes(HashAlgorithm::Sha1, b"b");
        put_file_stream(&conn, &a_id, b"a").unwrap();
        put_file_stream(&conn, &b_id, b"b").unwrap();

        let mut old = Trove::new("foo:runtime", v("/example.com@ns:1/1.0-1-1"), Flavor::empty());
        old.add_file("P1", "/bin/foo", a_id, v("/example.com@ns:1/1.0-1-1")).unwrap();

        let mut new = Trove::new("foo:runtime", v("/example.com@ns:1/1.1-1-1"), Flavor::empty());
        new.add_file("P2", "/bin/bar", b_id, v("/example.com@ns:1/1.1-1-1")).unwrap();

        let cs = diff_troves(&conn, Some(&old), &new).unwrap();
        assert_eq!(cs.added_files.len(), 1);
        assert_eq!(cs.removed_files, vec!["P1".to_string()]);
    }
}
