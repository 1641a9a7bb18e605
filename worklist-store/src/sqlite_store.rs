//! SQLite-based panel storage
//!
//! Schema:
//!   - panels: one row per panel, JSON body in `value`
//!   - views: (panel_id, id), with `is_default` mirrored out of the JSON body
//!   - acl: (panel_id, user_id) -> permission

use crate::error::{Result, StoreError};
use crate::panel_store::PanelStore;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use worklist_core::{Acl, Panel, Permission, View};

/// SQLite-based panel store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[allow(clippy::result_large_err)]
impl SqliteStore {
    /// Open the store (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for read-write concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS panels (
                id TEXT NOT NULL PRIMARY KEY,
                created_at TEXT NOT NULL,
                value TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS views (
                panel_id TEXT NOT NULL,
                id TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (panel_id, id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS acl (
                panel_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                permission TEXT NOT NULL,
                PRIMARY KEY (panel_id, user_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_acl_user ON acl(user_id)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("SQLite connection lock poisoned".into()))
    }

    /// Execute multiple statements atomically within an SQLite transaction
    fn in_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

fn panel_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM panels WHERE id = ?", params![id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn read_views(conn: &Connection, panel_id: &str) -> Result<Vec<View>> {
    let mut stmt = conn.prepare(
        "SELECT value FROM views WHERE panel_id = ? ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![panel_id], |row| row.get::<_, String>(0))?;

    let mut views = Vec::new();
    for value in rows {
        views.push(serde_json::from_str(&value?)?);
    }
    Ok(views)
}

/// Demote every other default view of the panel
fn clear_default(conn: &Connection, panel_id: &str, keep: &str) -> Result<()> {
    for mut view in read_views(conn, panel_id)? {
        if view.is_default && view.id != keep {
            view.is_default = false;
            conn.execute(
                "UPDATE views SET is_default = 0, value = ? WHERE panel_id = ? AND id = ?",
                params![serde_json::to_string(&view)?, panel_id, view.id],
            )?;
        }
    }
    Ok(())
}

fn write_view(conn: &Connection, view: &View) -> Result<()> {
    if view.is_default {
        clear_default(conn, &view.panel_id, &view.id)?;
    }
    conn.execute(
        "INSERT OR REPLACE INTO views (panel_id, id, is_default, created_at, value)
         VALUES (?, ?, ?, ?, ?)",
        params![
            view.panel_id,
            view.id,
            view.is_default,
            timestamp(&view.created_at),
            serde_json::to_string(view)?
        ],
    )?;
    Ok(())
}

fn parse_permission(text: String) -> Result<Permission> {
    text.parse()
        .map_err(|_| StoreError::Other(format!("Unknown permission in database: {}", text)))
}

#[allow(clippy::result_large_err)]
impl PanelStore for SqliteStore {
    fn create_panel(&self, panel: &Panel) -> Result<()> {
        self.in_transaction(|tx| {
            if panel_exists(tx, &panel.id)? {
                return Err(StoreError::Conflict(format!("Panel {} already exists", panel.id)));
            }
            tx.execute(
                "INSERT INTO panels (id, created_at, value) VALUES (?, ?, ?)",
                params![panel.id, timestamp(&panel.created_at), serde_json::to_string(panel)?],
            )?;
            Ok(())
        })
    }

    fn get_panel(&self, id: &str) -> Result<Option<Panel>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM panels WHERE id = ?", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    fn list_panels(&self) -> Result<Vec<Panel>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value FROM panels ORDER BY created_at, id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut panels = Vec::new();
        for value in rows {
            panels.push(serde_json::from_str(&value?)?);
        }
        Ok(panels)
    }

    fn update_panel(&self, panel: &Panel) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE panels SET value = ? WHERE id = ?",
            params![serde_json::to_string(panel)?, panel.id],
        )?;
        if rows == 0 {
            return Err(StoreError::not_found("Panel", &panel.id));
        }
        Ok(())
    }

    fn delete_panel(&self, id: &str) -> Result<bool> {
        self.in_transaction(|tx| {
            tx.execute("DELETE FROM views WHERE panel_id = ?", params![id])?;
            tx.execute("DELETE FROM acl WHERE panel_id = ?", params![id])?;
            let rows = tx.execute("DELETE FROM panels WHERE id = ?", params![id])?;
            tracing::debug!(panel_id = id, deleted = rows > 0, "Deleted panel");
            Ok(rows > 0)
        })
    }

    fn create_view(&self, view: &View) -> Result<()> {
        self.in_transaction(|tx| {
            if !panel_exists(tx, &view.panel_id)? {
                return Err(StoreError::not_found("Panel", &view.panel_id));
            }
            let exists = tx
                .query_row(
                    "SELECT 1 FROM views WHERE panel_id = ? AND id = ?",
                    params![view.panel_id, view.id],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Conflict(format!("View {} already exists", view.id)));
            }
            write_view(tx, view)
        })
    }

    fn get_view(&self, panel_id: &str, view_id: &str) -> Result<Option<View>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM views WHERE panel_id = ? AND id = ?",
                params![panel_id, view_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    fn list_views(&self, panel_id: &str) -> Result<Vec<View>> {
        let conn = self.lock()?;
        read_views(&conn, panel_id)
    }

    fn update_view(&self, view: &View) -> Result<()> {
        self.in_transaction(|tx| {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM views WHERE panel_id = ? AND id = ?",
                    params![view.panel_id, view.id],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::not_found("View", &view.id));
            }
            write_view(tx, view)
        })
    }

    fn delete_view(&self, panel_id: &str, view_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM views WHERE panel_id = ? AND id = ?",
            params![panel_id, view_id],
        )?;
        Ok(rows > 0)
    }

    fn put_acl(&self, acl: &Acl) -> Result<()> {
        self.in_transaction(|tx| {
            if !panel_exists(tx, &acl.panel_id)? {
                return Err(StoreError::not_found("Panel", &acl.panel_id));
            }
            tx.execute(
                "INSERT OR REPLACE INTO acl (panel_id, user_id, permission) VALUES (?, ?, ?)",
                params![acl.panel_id, acl.user_id, acl.permission.as_str()],
            )?;
            Ok(())
        })
    }

    fn list_acl(&self, panel_id: &str) -> Result<Vec<Acl>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, permission FROM acl WHERE panel_id = ? ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![panel_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (user_id, permission) = row?;
            entries.push(Acl {
                panel_id: panel_id.to_string(),
                user_id,
                permission: parse_permission(permission)?,
            });
        }
        Ok(entries)
    }

    fn delete_acl(&self, panel_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM acl WHERE panel_id = ? AND user_id = ?",
            params![panel_id, user_id],
        )?;
        Ok(rows > 0)
    }

    fn permission_for(&self, panel_id: &str, user_id: &str) -> Result<Option<Permission>> {
        let conn = self.lock()?;
        let permission = conn
            .query_row(
                "SELECT permission FROM acl WHERE panel_id = ? AND user_id = ?",
                params![panel_id, user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        permission.map(parse_permission).transpose()
    }
}
