//! In-memory panel storage for tests and ephemeral deployments

use crate::error::{Result, StoreError};
use crate::panel_store::PanelStore;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use worklist_core::{Acl, Panel, Permission, View};

#[derive(Default)]
struct Tables {
    panels: BTreeMap<String, Panel>,
    /// Keyed by (panel_id, view_id)
    views: BTreeMap<(String, String), View>,
    /// Keyed by (panel_id, user_id)
    acl: BTreeMap<(String, String), Permission>,
}

impl Tables {
    fn views_of(&self, panel_id: &str) -> impl Iterator<Item = &View> {
        self.views.values().filter(move |v| v.panel_id == panel_id)
    }

    fn store_view(&mut self, view: &View) {
        if view.is_default {
            for other in self.views.values_mut() {
                if other.panel_id == view.panel_id && other.id != view.id {
                    other.is_default = false;
                }
            }
        }
        self.views
            .insert((view.panel_id.clone(), view.id.clone()), view.clone());
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Other("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Other("memory store lock poisoned".into()))
    }
}

fn key(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

impl PanelStore for MemoryStore {
    fn create_panel(&self, panel: &Panel) -> Result<()> {
        let mut tables = self.write()?;
        if tables.panels.contains_key(&panel.id) {
            return Err(StoreError::Conflict(format!("Panel {} already exists", panel.id)));
        }
        tables.panels.insert(panel.id.clone(), panel.clone());
        Ok(())
    }

    fn get_panel(&self, id: &str) -> Result<Option<Panel>> {
        Ok(self.read()?.panels.get(id).cloned())
    }

    fn list_panels(&self) -> Result<Vec<Panel>> {
        let mut panels: Vec<Panel> = self.read()?.panels.values().cloned().collect();
        panels.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(panels)
    }

    fn update_panel(&self, panel: &Panel) -> Result<()> {
        let mut tables = self.write()?;
        match tables.panels.get_mut(&panel.id) {
            Some(existing) => {
                *existing = panel.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("Panel", &panel.id)),
        }
    }

    fn delete_panel(&self, id: &str) -> Result<bool> {
        let mut tables = self.write()?;
        tables.views.retain(|(panel_id, _), _| panel_id != id);
        tables.acl.retain(|(panel_id, _), _| panel_id != id);
        Ok(tables.panels.remove(id).is_some())
    }

    fn create_view(&self, view: &View) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.panels.contains_key(&view.panel_id) {
            return Err(StoreError::not_found("Panel", &view.panel_id));
        }
        if tables.views.contains_key(&key(&view.panel_id, &view.id)) {
            return Err(StoreError::Conflict(format!("View {} already exists", view.id)));
        }
        tables.store_view(view);
        Ok(())
    }

    fn get_view(&self, panel_id: &str, view_id: &str) -> Result<Option<View>> {
        Ok(self.read()?.views.get(&key(panel_id, view_id)).cloned())
    }

    fn list_views(&self, panel_id: &str) -> Result<Vec<View>> {
        let mut views: Vec<View> = self.read()?.views_of(panel_id).cloned().collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(views)
    }

    fn update_view(&self, view: &View) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.views.contains_key(&key(&view.panel_id, &view.id)) {
            return Err(StoreError::not_found("View", &view.id));
        }
        tables.store_view(view);
        Ok(())
    }

    fn delete_view(&self, panel_id: &str, view_id: &str) -> Result<bool> {
        Ok(self.write()?.views.remove(&key(panel_id, view_id)).is_some())
    }

    fn put_acl(&self, acl: &Acl) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.panels.contains_key(&acl.panel_id) {
            return Err(StoreError::not_found("Panel", &acl.panel_id));
        }
        tables
            .acl
            .insert(key(&acl.panel_id, &acl.user_id), acl.permission);
        Ok(())
    }

    fn list_acl(&self, panel_id: &str) -> Result<Vec<Acl>> {
        Ok(self
            .read()?
            .acl
            .iter()
            .filter(|((p, _), _)| p == panel_id)
            .map(|((p, user), permission)| Acl {
                panel_id: p.clone(),
                user_id: user.clone(),
                permission: *permission,
            })
            .collect())
    }

    fn delete_acl(&self, panel_id: &str, user_id: &str) -> Result<bool> {
        Ok(self.write()?.acl.remove(&key(panel_id, user_id)).is_some())
    }

    fn permission_for(&self, panel_id: &str, user_id: &str) -> Result<Option<Permission>> {
        Ok(self.read()?.acl.get(&key(panel_id, user_id)).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel_store::conformance;

    #[test]
    fn test_panel_lifecycle() {
        conformance::panel_lifecycle(&MemoryStore::new());
    }

    #[test]
    fn test_views_and_defaults() {
        conformance::views_and_defaults(&MemoryStore::new());
    }

    #[test]
    fn test_acl_entries() {
        conformance::acl_entries(&MemoryStore::new());
    }

    #[test]
    fn test_delete_cascades() {
        conformance::delete_cascades(&MemoryStore::new());
    }
}
