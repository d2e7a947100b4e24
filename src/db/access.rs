// src/db/access.rs

//! Roles, permissions, and the caches that make per-instance
//! authorization checks cheap. A role is a named group of users;
//! permissions attach glob patterns over label and item name to a
//! role, each granting write and/or remove rights. `isAdmin` is a
//! plain boolean attribute on the role rather than a synthesized
//! permission row.

use crate::error::{Error, Result};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: i64,
    pub role_id: i64,
    pub label_pattern: String,
    pub item_pattern: String,
    pub can_write: bool,
    pub can_remove: bool,
}

/// Translate a `*`-glob (the only wildcard repository permission
/// patterns use) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            c if regex_syntax::is_meta_character(c) => {
                re.push('\\');
                re.push(c);
            }
            c => re.push(c),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| Error::parse(format!("invalid permission pattern '{pattern}': {e}")))
}

pub fn create_role(conn: &Connection, name: &str, is_admin: bool) -> Result<i64> {
    conn.execute(
        "INSERT INTO Roles (role, isAdmin) VALUES (?1, ?2)",
        params![name, is_admin as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_role(conn: &Connection, name: &str) -> Result<Option<Role>> {
    conn.query_row(
        "SELECT roleId, role, isAdmin FROM Roles WHERE role = ?1",
        [name],
        |row| {
            Ok(Role {
                id: row.get(0)?,
                name: row.get(1)?,
                is_admin: row.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
    .map_err(Error::from)
}

pub fn add_permission(
    conn: &Connection,
    role_id: i64,
    label_pattern: &str,
    item_pattern: &str,
    can_write: bool,
    can_remove: bool,
) -> Result<i64> {
    // Validate the patterns compile before they are ever matched.
    glob_to_regex(label_pattern)?;
    glob_to_regex(item_pattern)?;
    conn.execute(
        "INSERT INTO Permissions (roleId, labelPattern, itemPattern, canWrite, canRemove) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![role_id, label_pattern, item_pattern, can_write as i64, can_remove as i64],
    )?;
    let permission_id = conn.last_insert_rowid();
    rebuild_role_instance_cache(conn, role_id)?;
    Ok(permission_id)
}

/// Check whether `role` can write to `(label, item)`. Admin roles
/// pass unconditionally; otherwise every permission row attached to
/// the role is tried until one grants it.
pub fn check_write(conn: &Connection, role_name: &str, label: &str, item: &str) -> Result<bool> {
    check(conn, role_name, label, item, true)
}

pub fn check_remove(conn: &Connection, role_name: &str, label: &str, item: &str) -> Result<bool> {
    check(conn, role_name, label, item, false)
}

fn check(conn: &Connection, role_name: &str, label: &str, item: &str, want_write: bool) -> Result<bool> {
    let role = get_role(conn, role_name)?.ok_or_else(|| Error::not_found(format!("no role '{role_name}'")))?;
    if role.is_admin {
        return Ok(true);
    }
    let mut stmt = conn.prepare(
        "SELECT labelPattern, itemPattern, canWrite, canRemove FROM Permissions WHERE roleId = ?1",
    )?;
    let rows = stmt.query_map([role.id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)? != 0,
            row.get::<_, i64>(3)? != 0,
        ))
    })?;
    for row in rows {
        let (label_pattern, item_pattern, can_write, can_remove) = row?;
        let granted = if want_write { can_write } else { can_remove };
        if !granted {
            continue;
        }
        if glob_to_regex(&label_pattern)?.is_match(label) && glob_to_regex(&item_pattern)?.is_match(item) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Rebuild `RoleInstanceCache` for one role against every instance
/// currently present: a denormalized permission-to-instance join so
/// per-instance authorization avoids pattern matching on the hot
/// path. Recomputed whenever the role's permission set changes.
pub fn rebuild_role_instance_cache(conn: &Connection, role_id: i64) -> Result<()> {
    conn.execute("DELETE FROM RoleInstanceCache WHERE roleId = ?1", [role_id])?;

    let role: bool = conn.query_row("SELECT isAdmin FROM Roles WHERE roleId = ?1", [role_id], |r| {
        Ok(r.get::<_, i64>(0)? != 0)
    })?;
    if role {
        conn.execute(
            "INSERT INTO RoleInstanceCache (roleId, instanceId, canWrite, canRemove) \
             SELECT ?1, instanceId, 1, 1 FROM Instances",
            [role_id],
        )?;
        return Ok(());
    }

    let mut perm_stmt = conn.prepare(
        "SELECT labelPattern, itemPattern, canWrite, canRemove FROM Permissions WHERE roleId = ?1",
    )?;
    let permissions: Vec<(String, String, bool, bool)> = perm_stmt
        .query_map([role_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? != 0,
                row.get::<_, i64>(3)? != 0,
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut inst_stmt = conn.prepare(
        "SELECT i.instanceId, it.item, b.branch FROM Instances i \
         JOIN Items it ON it.itemId = i.itemId \
         JOIN Nodes n ON n.itemId = i.itemId AND n.versionId = i.versionId \
         JOIN Branches b ON b.branchId = n.branchId",
    )?;
    let instances: Vec<(i64, String, String)> = inst_stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<_>>()?;

    for (instance_id, item, label) in instances {
        let mut can_write = false;
        let mut can_remove = false;
        for (label_pattern, item_pattern, perm_write, perm_remove) in &permissions {
            if glob_to_regex(label_pattern)?.is_match(&label) && glob_to_regex(item_pattern)?.is_match(&item) {
                can_write |= perm_write;
                can_remove |= perm_remove;
            }
        }
        if can_write || can_remove {
            conn.execute(
                "INSERT INTO RoleInstanceCache (roleId, instanceId, canWrite, canRemove) VALUES (?1, ?2, ?3, ?4)",
                params![role_id, instance_id, can_write as i64, can_remove as i64],
            )?;
        }
    }
    Ok(())
}

mod regex_syntax {
    /// Characters that need escaping when a glob's literal segments are
    /// dropped verbatim into a regex.
    pub fn is_meta_character(c: char) -> bool {
        matches!(c, '.' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::SqliteDialect;
    use crate::db::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_schema(&conn, &SqliteDialect).unwrap();
        conn
    }

    #[test]
    fn test_admin_role_can_write_anything() {
        let conn = conn();
        create_role(&conn, "admins", true).unwrap();
        assert!(check_write(&conn, "admins", "anything@ns:1", "foo:runtime").unwrap());
    }

    #[test]
    fn test_glob_permission_matches_prefix() {
        let conn = conn();
        let role_id = create_role(&conn, "devel", false).unwrap();
        add_permission(&conn, role_id, "example.com@ns:*", "foo:*", true, false).unwrap();
        assert!(check_write(&conn, "devel", "example.com@ns:1", "foo:runtime").unwrap());
        assert!(!check_write(&conn, "devel", "other.com@ns:1", "foo:runtime").unwrap());
        assert!(!check_remove(&conn, "devel", "example.com@ns:1", "foo:runtime").unwrap());
    }

    #[test]
    fn test_unknown_role_is_not_found() {
        let conn = conn();
        assert!(check_write(&conn, "ghost", "l@ns:1", "foo").is_err());
    }
}
