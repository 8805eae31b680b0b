//! Methodology persistence.
//!
//! RULE: Only store.rs talks to the database.
//! The registry owns the live table and writes every change through a
//! MethodologyStore before publishing it.

use crate::{
    error::EngineResult,
    methodology::{Methodology, MethodologyType, ParameterSpec},
    types::{MethodologyId, Timestamp},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Backing store for the registry. Writes are whole-record upserts.
pub trait MethodologyStore: Send + Sync {
    /// Every stored methodology, ordered by name.
    fn load_all(&self) -> EngineResult<Vec<Methodology>>;
    fn save(&self, methodology: &Methodology) -> EngineResult<()>;
    fn remove(&self, id: &str) -> EngineResult<()>;
}

// ── In-memory ──────────────────────────────────────────────────

/// Volatile store; contents live as long as the store value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<MethodologyId, Methodology>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<MethodologyId, Methodology>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MethodologyStore for MemoryStore {
    fn load_all(&self) -> EngineResult<Vec<Methodology>> {
        let mut all: Vec<Methodology> = self.rows().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    fn save(&self, methodology: &Methodology) -> EngineResult<()> {
        self.rows().insert(methodology.id.clone(), methodology.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> EngineResult<()> {
        self.rows().remove(id);
        Ok(())
    }
}

// ── SQLite ─────────────────────────────────────────────────────

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// A row as stored, before the text columns are decoded.
struct RawRow {
    id:                  String,
    name:                String,
    methodology_type:    String,
    framework:           Option<String>,
    description:         Option<String>,
    parameter_schema:    String,
    calculation_routine: String,
    is_active:           bool,
    created_at:          String,
    updated_at:          String,
}

impl SqliteStore {
    /// Open (or create) the methodology database at `path`.
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        log::info!("store: opened {path}");
        Ok(store)
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Apply all schema migrations in order. Idempotent.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn()
            .execute_batch(include_str!("../../migrations/001_methodology.sql"))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MethodologyStore for SqliteStore {
    fn load_all(&self) -> EngineResult<Vec<Methodology>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, methodology_type, framework, description, parameter_schema,
                    calculation_routine, is_active, created_at, updated_at
             FROM methodology ORDER BY name ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawRow {
                    id:                  row.get(0)?,
                    name:                row.get(1)?,
                    methodology_type:    row.get(2)?,
                    framework:           row.get(3)?,
                    description:         row.get(4)?,
                    parameter_schema:    row.get(5)?,
                    calculation_routine: row.get(6)?,
                    is_active:           row.get::<_, i64>(7)? != 0,
                    created_at:          row.get(8)?,
                    updated_at:          row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut all = Vec::with_capacity(rows.len());
        for raw in rows {
            let id = raw.id.clone();
            match decode(raw) {
                Ok(m) => all.push(m),
                Err(reason) => log::warn!("store: skipping unreadable row {id}: {reason}"),
            }
        }
        Ok(all)
    }

    fn save(&self, m: &Methodology) -> EngineResult<()> {
        let schema = serde_json::to_string(&m.parameter_schema)?;
        self.conn().execute(
            "INSERT INTO methodology
                 (id, name, methodology_type, framework, description, parameter_schema,
                  calculation_routine, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 name                = excluded.name,
                 methodology_type    = excluded.methodology_type,
                 framework           = excluded.framework,
                 description         = excluded.description,
                 parameter_schema    = excluded.parameter_schema,
                 calculation_routine = excluded.calculation_routine,
                 is_active           = excluded.is_active,
                 updated_at          = excluded.updated_at",
            params![
                m.id,
                m.name,
                m.methodology_type.as_str(),
                m.framework,
                m.description,
                schema,
                m.calculation_routine,
                m.is_active as i64,
                m.created_at.to_rfc3339(),
                m.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn remove(&self, id: &str) -> EngineResult<()> {
        self.conn()
            .execute("DELETE FROM methodology WHERE id = ?1", params![id])?;
        Ok(())
    }
}

fn decode(raw: RawRow) -> Result<Methodology, String> {
    let methodology_type = MethodologyType::parse(&raw.methodology_type)
        .ok_or_else(|| format!("unknown methodology type '{}'", raw.methodology_type))?;
    let parameter_schema: Vec<ParameterSpec> = serde_json::from_str(&raw.parameter_schema)
        .map_err(|e| format!("bad parameter schema: {e}"))?;
    Ok(Methodology {
        id: raw.id,
        name: raw.name,
        methodology_type,
        framework: raw.framework,
        description: raw.description,
        parameter_schema,
        calculation_routine: raw.calculation_routine,
        is_active: raw.is_active,
        created_at: timestamp(&raw.created_at)?,
        updated_at: timestamp(&raw.updated_at)?,
    })
}

fn timestamp(text: &str) -> Result<Timestamp, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{text}': {e}"))
}
