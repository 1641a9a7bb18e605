//! Storage adapter for panels, views and ACL entries

use crate::error::Result;
use worklist_core::{Acl, Panel, Permission, View};

/// Persistence for panel configuration.
///
/// Implementations must:
///   - reject creating a panel or view whose id already exists (`Conflict`)
///   - reject views and ACL entries for an unknown panel (`NotFound`)
///   - cascade `delete_panel` to the panel's views and ACL entries
///   - keep at most one default view per panel; storing a default view clears the previous one
pub trait PanelStore: Send + Sync {
    fn create_panel(&self, panel: &Panel) -> Result<()>;
    fn get_panel(&self, id: &str) -> Result<Option<Panel>>;
    /// Ordered by creation time
    fn list_panels(&self) -> Result<Vec<Panel>>;
    fn update_panel(&self, panel: &Panel) -> Result<()>;
    fn delete_panel(&self, id: &str) -> Result<bool>;

    fn create_view(&self, view: &View) -> Result<()>;
    fn get_view(&self, panel_id: &str, view_id: &str) -> Result<Option<View>>;
    fn list_views(&self, panel_id: &str) -> Result<Vec<View>>;
    fn update_view(&self, view: &View) -> Result<()>;
    fn delete_view(&self, panel_id: &str, view_id: &str) -> Result<bool>;

    /// Insert or replace the entry for `(panel_id, user_id)`
    fn put_acl(&self, acl: &Acl) -> Result<()>;
    fn list_acl(&self, panel_id: &str) -> Result<Vec<Acl>>;
    fn delete_acl(&self, panel_id: &str, user_id: &str) -> Result<bool>;
    fn permission_for(&self, panel_id: &str, user_id: &str) -> Result<Option<Permission>>;

    fn default_view(&self, panel_id: &str) -> Result<Option<View>> {
        Ok(self
            .list_views(panel_id)?
            .into_iter()
            .find(|view| view.is_default))
    }
}

/// Behaviour checks shared by every store implementation
#[cfg(test)]
pub(crate) mod conformance {
    use super::PanelStore;
    use crate::error::StoreError;
    use chrono::{TimeDelta, Utc};
    use worklist_core::{Acl, DataSource, Panel, Permission, ResourceType, View};

    fn panel(id: &str, minutes_ago: i64) -> Panel {
        let mut panel = Panel::new(id, format!("Panel {}", id), DataSource::new(ResourceType::Task));
        panel.created_at = Utc::now() - TimeDelta::minutes(minutes_ago);
        panel
    }

    pub fn panel_lifecycle(store: &dyn PanelStore) {
        store.create_panel(&panel("b", 5)).unwrap();
        store.create_panel(&panel("a", 1)).unwrap();

        let ids: Vec<_> = store.list_panels().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["b", "a"]);

        assert!(matches!(
            store.create_panel(&panel("a", 0)),
            Err(StoreError::Conflict(_))
        ));

        let mut updated = store.get_panel("a").unwrap().unwrap();
        updated.name = "Renamed".into();
        updated.columns.truncate(2);
        store.update_panel(&updated).unwrap();
        let fetched = store.get_panel("a").unwrap().unwrap();
        assert_eq!(fetched.name, "Renamed");
        assert_eq!(fetched.columns.len(), 2);

        assert!(matches!(
            store.update_panel(&panel("zzz", 0)),
            Err(StoreError::NotFound { .. })
        ));

        assert!(store.delete_panel("b").unwrap());
        assert!(!store.delete_panel("b").unwrap());
        assert!(store.get_panel("b").unwrap().is_none());
    }

    pub fn views_and_defaults(store: &dyn PanelStore) {
        store.create_panel(&panel("p", 0)).unwrap();

        let orphan = View::new("v0", "missing", "Orphan");
        assert!(matches!(
            store.create_view(&orphan),
            Err(StoreError::NotFound { .. })
        ));

        let mut first = View::new("v1", "p", "First");
        first.is_default = true;
        store.create_view(&first).unwrap();

        let mut second = View::new("v2", "p", "Second");
        second.created_at = first.created_at + TimeDelta::seconds(1);
        second.is_default = true;
        store.create_view(&second).unwrap();

        assert!(!store.get_view("p", "v1").unwrap().unwrap().is_default);
        assert_eq!(store.default_view("p").unwrap().unwrap().id, "v2");

        // Promoting v1 again through an update demotes v2
        let mut first = store.get_view("p", "v1").unwrap().unwrap();
        first.is_default = true;
        store.update_view(&first).unwrap();
        assert_eq!(store.default_view("p").unwrap().unwrap().id, "v1");

        let names: Vec<_> = store
            .list_views("p")
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["First", "Second"]);

        assert!(store.delete_view("p", "v2").unwrap());
        assert!(store.get_view("p", "v2").unwrap().is_none());
        assert!(matches!(
            store.update_view(&View::new("v9", "p", "Nope")),
            Err(StoreError::NotFound { .. })
        ));
    }

    pub fn acl_entries(store: &dyn PanelStore) {
        store.create_panel(&panel("p", 0)).unwrap();
        let acl = |user: &str, permission| Acl {
            panel_id: "p".into(),
            user_id: user.into(),
            permission,
        };

        store.put_acl(&acl("alice", Permission::Owner)).unwrap();
        store.put_acl(&acl("bob", Permission::Viewer)).unwrap();
        store.put_acl(&acl("bob", Permission::Editor)).unwrap();

        assert_eq!(
            store.permission_for("p", "bob").unwrap(),
            Some(Permission::Editor)
        );
        assert_eq!(store.permission_for("p", "carol").unwrap(), None);
        assert_eq!(store.list_acl("p").unwrap().len(), 2);

        assert!(matches!(
            store.put_acl(&Acl {
                panel_id: "nope".into(),
                user_id: "alice".into(),
                permission: Permission::Owner,
            }),
            Err(StoreError::NotFound { .. })
        ));

        assert!(store.delete_acl("p", "bob").unwrap());
        assert!(!store.delete_acl("p", "bob").unwrap());
    }

    pub fn delete_cascades(store: &dyn PanelStore) {
        store.create_panel(&panel("p", 0)).unwrap();
        store.create_view(&View::new("v1", "p", "View")).unwrap();
        store
            .put_acl(&Acl {
                panel_id: "p".into(),
                user_id: "alice".into(),
                permission: Permission::Owner,
            })
            .unwrap();

        assert!(store.delete_panel("p").unwrap());
        assert!(store.list_views("p").unwrap().is_empty());
        assert!(store.list_acl("p").unwrap().is_empty());

        // The id can be reused afterwards
        store.create_panel(&panel("p", 0)).unwrap();
        assert!(store.list_views("p").unwrap().is_empty());
    }
}
