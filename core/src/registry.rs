//! Methodology registry: the authoritative table of methodologies.
//!
//! RULE: Published methodologies are immutable. An edit builds a new
//! record and swaps it in, so a run that already holds an `Arc` keeps
//! executing the version it started with.
//!
//! RULE: Nothing enters the table without passing the formula validator
//! and the schema checks, including rows read back from the store.
//!
//! Writes to one id are serialized by a per-id lock. The table lock is
//! only held for the uniqueness check, the store write and the swap.
//! A per-id lock lives only as long as its id is in the table.

use crate::{
    error::{EngineError, EngineResult},
    methodology::{check_schema, Methodology, MethodologyDefinition, MethodologySummary},
    store::{MemoryStore, MethodologyStore},
    types::MethodologyId,
    validator,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

type Table = BTreeMap<MethodologyId, Arc<Methodology>>;

pub struct Registry {
    table:       RwLock<Table>,
    write_locks: Mutex<HashMap<MethodologyId, Arc<Mutex<()>>>>,
    store:       Box<dyn MethodologyStore>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry over a fresh in-memory store.
    pub fn new() -> Self {
        Self {
            table:       RwLock::new(BTreeMap::new()),
            write_locks: Mutex::new(HashMap::new()),
            store:       Box::new(MemoryStore::new()),
        }
    }

    /// Load every stored methodology. Rows that no longer validate, or
    /// whose name collides with an earlier row, are skipped.
    pub fn open(store: Box<dyn MethodologyStore>) -> EngineResult<Self> {
        let mut table = Table::new();
        let mut skipped = 0usize;
        for m in store.load_all()? {
            if let Err(e) = check_definition(&m.definition()) {
                log::warn!("registry: skipping stored methodology '{}' ({}): {e}", m.name, m.id);
                skipped += 1;
                continue;
            }
            if table.values().any(|other| other.name == m.name) {
                log::warn!("registry: skipping duplicate stored name '{}' ({})", m.name, m.id);
                skipped += 1;
                continue;
            }
            table.insert(m.id.clone(), Arc::new(m));
        }
        log::info!("registry: loaded {} methodologies ({skipped} skipped)", table.len());
        Ok(Self {
            table: RwLock::new(table),
            write_locks: Mutex::new(HashMap::new()),
            store,
        })
    }

    // ── Reads ──────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> EngineResult<Arc<Methodology>> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Methodology>> {
        self.read().values().find(|m| m.name == name).cloned()
    }

    /// Summaries ordered by name.
    pub fn list(&self, active_only: bool) -> Vec<MethodologySummary> {
        self.all()
            .iter()
            .filter(|m| !active_only || m.is_active)
            .map(|m| m.summary())
            .collect()
    }

    /// Full records ordered by name.
    pub fn all(&self) -> Vec<Arc<Methodology>> {
        let mut all: Vec<Arc<Methodology>> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Writes ─────────────────────────────────────────────────

    pub fn create(&self, def: MethodologyDefinition) -> EngineResult<Arc<Methodology>> {
        check_definition(&def)?;
        let now = Utc::now();
        let methodology = Methodology {
            id: Uuid::new_v4().to_string(),
            name: def.name,
            methodology_type: def.methodology_type,
            framework: def.framework,
            description: def.description,
            parameter_schema: def.parameter_schema,
            calculation_routine: def.calculation_routine,
            is_active: def.is_active,
            created_at: now,
            updated_at: now,
        };
        let created = self.publish(methodology, None)?;
        log::info!("registry: created '{}' ({})", created.name, created.id);
        Ok(created)
    }

    /// Insert a complete record, keeping its id and timestamps.
    pub fn restore(&self, methodology: Methodology) -> EngineResult<Arc<Methodology>> {
        check_definition(&methodology.definition())?;
        let id = methodology.id.clone();
        let restored = self.locked(&id, || self.publish(methodology, None))?;
        log::info!("registry: restored '{}' ({})", restored.name, restored.id);
        Ok(restored)
    }

    /// Replace the content of `id`. Identity and `created_at` are kept.
    pub fn update(&self, id: &str, def: MethodologyDefinition) -> EngineResult<Arc<Methodology>> {
        check_definition(&def)?;
        let updated = self.locked(id, || {
            let current = self.get(id)?;
            let methodology = Methodology {
                id: current.id.clone(),
                name: def.name,
                methodology_type: def.methodology_type,
                framework: def.framework,
                description: def.description,
                parameter_schema: def.parameter_schema,
                calculation_routine: def.calculation_routine,
                is_active: def.is_active,
                created_at: current.created_at,
                updated_at: Utc::now().max(current.created_at),
            };
            self.publish(methodology, Some(id))
        })?;
        log::info!("registry: updated '{}' ({id})", updated.name);
        Ok(updated)
    }

    pub fn set_active(&self, id: &str, active: bool) -> EngineResult<Arc<Methodology>> {
        let (updated, changed) = self.locked(id, || {
            let current = self.get(id)?;
            if current.is_active == active {
                return Ok((current, false));
            }
            let mut methodology = (*current).clone();
            methodology.is_active = active;
            methodology.updated_at = Utc::now().max(current.updated_at);
            Ok((self.publish(methodology, Some(id))?, true))
        })?;
        if !changed {
            return Ok(updated);
        }
        log::info!(
            "registry: '{}' ({id}) is now {}",
            updated.name,
            if active { "active" } else { "inactive" }
        );
        Ok(updated)
    }

    /// Remove `id`. Runs already holding the record finish normally.
    pub fn delete(&self, id: &str) -> EngineResult<()> {
        self.locked(id, || {
            let mut table = self.write();
            let name = match table.get(id) {
                Some(m) => m.name.clone(),
                None => return Err(EngineError::NotFound(id.to_string())),
            };
            self.store.remove(id)?;
            table.remove(id);
            log::info!("registry: deleted '{name}' ({id})");
            Ok(())
        })
    }

    // ── Internals ──────────────────────────────────────────────

    /// Check name uniqueness, persist, then swap the record in. `replacing`
    /// names the id being edited, which may keep its own name.
    fn publish(&self, methodology: Methodology, replacing: Option<&str>) -> EngineResult<Arc<Methodology>> {
        let mut table = self.write();
        match replacing {
            Some(id) if !table.contains_key(id) => return Err(EngineError::NotFound(id.to_string())),
            None if table.contains_key(&methodology.id) => {
                return Err(EngineError::DuplicateId(methodology.id))
            }
            _ => {}
        }
        let clash = table
            .values()
            .any(|other| other.name == methodology.name && Some(other.id.as_str()) != replacing);
        if clash {
            return Err(EngineError::DuplicateName(methodology.name));
        }
        self.store.save(&methodology)?;
        let published = Arc::new(methodology);
        table.insert(published.id.clone(), published.clone());
        Ok(published)
    }

    /// Run `f` holding the write lock of `id`. The lock entry is dropped
    /// again when `id` is not in the table afterwards, whether `f`
    /// deleted it or it never existed.
    fn locked<T>(&self, id: &str, f: impl FnOnce() -> EngineResult<T>) -> EngineResult<T> {
        let lock = self.id_lock(id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        if !self.read().contains_key(id) {
            self.locks().remove(id);
        }
        result
    }

    fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks().entry(id.to_string()).or_default().clone()
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<MethodologyId, Arc<Mutex<()>>>> {
        self.write_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Validation gate shared by every write path.
fn check_definition(def: &MethodologyDefinition) -> EngineResult<()> {
    if def.name.trim().is_empty() {
        return Err(EngineError::Validation {
            errors: vec!["methodology name must not be empty".into()],
        });
    }
    let report = validator::validate(&def.calculation_routine);
    if !report.is_valid {
        return Err(EngineError::Validation { errors: report.errors });
    }
    check_schema(&def.parameter_schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methodology::{MethodologyType, ParameterKind, ParameterSpec};
    use serde_json::json;

    fn definition(name: &str) -> MethodologyDefinition {
        MethodologyDefinition {
            name: name.into(),
            methodology_type: MethodologyType::Quantitative,
            framework: None,
            description: None,
            parameter_schema: vec![ParameterSpec::new("x", ParameterKind::Number).default_value(json!(1.0))],
            calculation_routine: "function calculate(p) { return p.x }".into(),
            is_active: true,
        }
    }

    impl Registry {
        fn lock_count(&self) -> usize {
            self.locks().len()
        }
    }

    #[test]
    fn unknown_ids_leave_no_lock_entries() {
        let registry = Registry::new();
        for i in 0..100 {
            let id = format!("nope-{i}");
            assert!(matches!(registry.update(&id, definition("A")), Err(EngineError::NotFound(_))));
            assert!(matches!(registry.set_active(&id, false), Err(EngineError::NotFound(_))));
            assert!(matches!(registry.delete(&id), Err(EngineError::NotFound(_))));
        }
        assert_eq!(registry.lock_count(), 0);
    }

    #[test]
    fn failed_restore_leaves_no_lock_entry() {
        let registry = Registry::new();
        let taken = registry.create(definition("Taken")).unwrap();
        let mut clash = (*taken).clone();
        clash.id = "other-id".into();
        assert!(matches!(registry.restore(clash), Err(EngineError::DuplicateName(_))));
        assert!(registry.get("other-id").is_err());
        assert_eq!(registry.lock_count(), 0);
    }

    #[test]
    fn lock_entries_follow_the_table() {
        let registry = Registry::new();
        let m = registry.create(definition("Kept")).unwrap();
        registry.update(&m.id, definition("Kept v2")).unwrap();
        registry.set_active(&m.id, false).unwrap();
        assert_eq!(registry.lock_count(), 1);
        registry.delete(&m.id).unwrap();
        assert_eq!(registry.lock_count(), 0);
    }
}
