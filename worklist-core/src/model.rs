//! Panel, view and access-control records

use crate::error::{Result, WorklistError};
use crate::fhir_path::FhirPath;
use crate::table::{Column, ColumnType, Filter, FilterOperator, Sort, TableQuery};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Patient,
    Task,
    Appointment,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Task => "Task",
            ResourceType::Appointment => "Appointment",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = WorklistError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Patient" => Ok(ResourceType::Patient),
            "Task" => Ok(ResourceType::Task),
            "Appointment" => Ok(ResourceType::Appointment),
            other => Err(WorklistError::validation(format!(
                "unsupported resource type '{}'",
                other
            ))),
        }
    }
}

/// Upstream FHIR search feeding a panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub resource_type: ResourceType,
    /// Extra search parameters, e.g. `status=requested&_sort=-_lastUpdated`
    #[serde(default)]
    pub search_params: String,
}

impl DataSource {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            search_params: String::new(),
        }
    }

    /// Decoded `(name, value)` pairs of `search_params`
    pub fn search_pairs(&self) -> Result<Vec<(String, String)>> {
        self.search_params
            .trim_start_matches('?')
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                let name = decode(name)?;
                if name.is_empty() {
                    return Err(WorklistError::validation(format!(
                        "search parameter without a name: '{}'",
                        pair
                    )));
                }
                Ok((name, decode(value)?))
            })
            .collect()
    }
}

fn decode(text: &str) -> Result<String> {
    let text = text.replace('+', " ");
    urlencoding::decode(&text)
        .map(|s| s.into_owned())
        .map_err(|e| WorklistError::validation(format!("bad search parameter encoding: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data_source: DataSource,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Panel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, data_source: DataSource) -> Self {
        let now = Utc::now();
        let columns = Self::default_columns(data_source.resource_type);
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            data_source,
            columns,
            tags: Vec::new(),
            created_by: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WorklistError::validation("panel name must not be blank"));
        }
        self.data_source.search_pairs()?;

        let mut seen = HashSet::new();
        for column in &self.columns {
            validate_column(column)?;
            if !seen.insert(column.id.as_str()) {
                return Err(WorklistError::validation(format!(
                    "duplicate column id '{}'",
                    column.id
                )));
            }
        }
        Ok(())
    }

    /// Starter columns for a new panel over `resource_type`
    pub fn default_columns(resource_type: ResourceType) -> Vec<Column> {
        let col = Column::new;
        match resource_type {
            ResourceType::Patient => vec![
                col(
                    "name",
                    "Name",
                    "name.first().select(given.first() & ' ' & family)",
                    ColumnType::Text,
                ),
                col("birthDate", "Date of birth", "birthDate", ColumnType::Date),
                col("age", "Age", "birthDate.ageInYears()", ColumnType::Number),
                col("gender", "Gender", "gender", ColumnType::Select),
                col(
                    "phone",
                    "Phone",
                    "telecom.where(system = 'phone').value.first()",
                    ColumnType::Text,
                ),
                Column {
                    visible: false,
                    ..col("mrn", "MRN", "identifier.value.first()", ColumnType::Text)
                },
            ],
            ResourceType::Task => vec![
                col("description", "Description", "description", ColumnType::Text),
                col("status", "Status", "status", ColumnType::Select),
                col("priority", "Priority", "priority", ColumnType::Select),
                col("due", "Due", "restriction.period.end", ColumnType::DateTime),
                col("patient", "Patient", "for.display", ColumnType::Reference),
                col("owner", "Owner", "owner.display", ColumnType::Reference),
                col("tags", "Tags", "meta.tag.code", ColumnType::Tags),
            ],
            ResourceType::Appointment => vec![
                col("start", "Start", "start", ColumnType::DateTime),
                col("end", "End", "end", ColumnType::DateTime),
                col("status", "Status", "status", ColumnType::Select),
                col(
                    "serviceType",
                    "Service",
                    "serviceType.first().text",
                    ColumnType::Text,
                ),
                col(
                    "participants",
                    "Participants",
                    "participant.actor.display",
                    ColumnType::Tags,
                ),
            ],
        }
    }
}

pub fn validate_column(column: &Column) -> Result<()> {
    if column.id.trim().is_empty() {
        return Err(WorklistError::validation("column id must not be blank"));
    }
    if column.name.trim().is_empty() {
        return Err(WorklistError::validation(format!(
            "column '{}' needs a name",
            column.id
        )));
    }
    FhirPath::compile(&column.source_field).map_err(|e| {
        WorklistError::validation(format!("column '{}': {}", column.id, e))
    })?;
    Ok(())
}

/// A saved filter/sort/visibility configuration over a panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub id: String,
    pub panel_id: String,
    pub name: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Column ids shown by this view; empty keeps the panel's own visibility
    #[serde(default)]
    pub visible_columns: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl View {
    pub fn new(id: impl Into<String>, panel_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            panel_id: panel_id.into(),
            name: name.into(),
            filters: Vec::new(),
            sorts: Vec::new(),
            search: None,
            visible_columns: Vec::new(),
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the view against the panel it belongs to
    pub fn validate(&self, panel: &Panel) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WorklistError::validation("view name must not be blank"));
        }
        if self.panel_id != panel.id {
            return Err(WorklistError::validation(format!(
                "view '{}' belongs to panel '{}'",
                self.id, self.panel_id
            )));
        }

        let known = |id: &str| -> Result<()> {
            if panel.column(id).is_none() {
                return Err(WorklistError::UnknownColumn(id.to_string()));
            }
            Ok(())
        };

        for filter in &self.filters {
            filter.validate()?;
            if filter.operator != FilterOperator::Expression {
                known(&filter.column_id)?;
            }
        }
        for sort in &self.sorts {
            known(&sort.column_id)?;
        }
        for id in &self.visible_columns {
            known(id)?;
        }
        Ok(())
    }

    pub fn to_query(
        &self,
        offset: usize,
        limit: Option<usize>,
        search_override: Option<&str>,
    ) -> TableQuery {
        TableQuery {
            filters: self.filters.clone(),
            sorts: self.sorts.clone(),
            search: search_override
                .map(str::to_string)
                .or_else(|| self.search.clone()),
            offset,
            limit,
        }
    }

    /// Panel columns with this view's visibility applied
    pub fn columns_for(&self, panel: &Panel) -> Vec<Column> {
        panel
            .columns
            .iter()
            .cloned()
            .map(|mut column| {
                if !self.visible_columns.is_empty() {
                    column.visible = self.visible_columns.contains(&column.id);
                }
                column
            })
            .collect()
    }

    /// Drop every reference to a removed column; returns whether anything changed
    pub fn prune_column(&mut self, column_id: &str) -> bool {
        let before = (self.filters.len(), self.sorts.len(), self.visible_columns.len());
        self.filters
            .retain(|f| f.operator == FilterOperator::Expression || f.column_id != column_id);
        self.sorts.retain(|s| s.column_id != column_id);
        self.visible_columns.retain(|id| id != column_id);
        before != (self.filters.len(), self.sorts.len(), self.visible_columns.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Viewer,
    Editor,
    Owner,
}

impl Permission {
    pub fn allows(self, required: Permission) -> bool {
        self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Viewer => "viewer",
            Permission::Editor => "editor",
            Permission::Owner => "owner",
        }
    }
}

impl FromStr for Permission {
    type Err = WorklistError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "viewer" => Ok(Permission::Viewer),
            "editor" => Ok(Permission::Editor),
            "owner" => Ok(Permission::Owner),
            other => Err(WorklistError::validation(format!(
                "unknown permission '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acl {
    pub panel_id: String,
    pub user_id: String,
    pub permission: Permission,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SortDirection;
    use serde_json::json;

    fn task_panel() -> Panel {
        Panel::new("p1", "My tasks", DataSource::new(ResourceType::Task))
    }

    #[test]
    fn test_default_columns_are_valid() {
        for resource_type in [
            ResourceType::Patient,
            ResourceType::Task,
            ResourceType::Appointment,
        ] {
            let panel = Panel::new("p", "Panel", DataSource::new(resource_type));
            assert!(!panel.columns.is_empty());
            panel.validate().unwrap();
        }
    }

    #[test]
    fn test_panel_validation() {
        let mut panel = task_panel();
        panel.name = "  ".into();
        assert!(panel.validate().is_err());

        let mut panel = task_panel();
        panel.columns.push(Column::new("status", "Again", "status", ColumnType::Text));
        assert!(panel.validate().is_err());

        let mut panel = task_panel();
        panel.columns.push(Column::new("broken", "Broken", "status.where(", ColumnType::Text));
        assert!(matches!(panel.validate(), Err(WorklistError::Validation { .. })));
    }

    #[test]
    fn test_search_pairs_decode() {
        let source = DataSource {
            resource_type: ResourceType::Task,
            search_params: "?status=requested&code=http%3A%2F%2Floinc.org%7C1234&_sort=-authored-on"
                .into(),
        };
        assert_eq!(
            source.search_pairs().unwrap(),
            vec![
                ("status".to_string(), "requested".to_string()),
                ("code".to_string(), "http://loinc.org|1234".to_string()),
                ("_sort".to_string(), "-authored-on".to_string()),
            ]
        );

        let bad = DataSource {
            resource_type: ResourceType::Task,
            search_params: "=x".into(),
        };
        assert!(bad.search_pairs().is_err());
    }

    #[test]
    fn test_view_validation_checks_columns() {
        let panel = task_panel();
        let mut view = View::new("v1", "p1", "Urgent");
        view.sorts.push(Sort {
            column_id: "due".into(),
            direction: SortDirection::Asc,
        });
        view.validate(&panel).unwrap();

        view.visible_columns.push("nope".into());
        assert!(matches!(view.validate(&panel), Err(WorklistError::UnknownColumn(_))));

        let mut view = View::new("v2", "p1", "Expr");
        view.filters.push(Filter {
            column_id: String::new(),
            operator: FilterOperator::Expression,
            value: json!("priority = "),
        });
        assert!(view.validate(&panel).is_err());
    }

    #[test]
    fn test_view_validation_checks_filter_values() {
        let panel = task_panel();
        let with_filter = |operator, value| {
            let mut view = View::new("v3", "p1", "Due");
            view.filters.push(Filter {
                column_id: "due".into(),
                operator,
                value,
            });
            view
        };

        assert!(with_filter(FilterOperator::DateRange, json!("this_week"))
            .validate(&panel)
            .is_ok());
        assert!(matches!(
            with_filter(FilterOperator::DateRange, json!("someday")).validate(&panel),
            Err(WorklistError::InvalidDateFilter(_))
        ));
        assert!(with_filter(FilterOperator::Between, json!("2024-01-01"))
            .validate(&panel)
            .is_err());
        assert!(with_filter(FilterOperator::NotIn, json!({"a": 1}))
            .validate(&panel)
            .is_err());
    }

    #[test]
    fn test_to_query_prefers_search_override() {
        let mut view = View::new("v1", "p1", "All");
        view.search = Some("smith".into());
        assert_eq!(view.to_query(0, Some(10), None).search.as_deref(), Some("smith"));
        let query = view.to_query(20, None, Some("jones"));
        assert_eq!(query.search.as_deref(), Some("jones"));
        assert_eq!(query.offset, 20);
    }

    #[test]
    fn test_columns_for_applies_visibility() {
        let panel = task_panel();
        let mut view = View::new("v1", "p1", "Narrow");
        assert!(view.columns_for(&panel).iter().all(|c| c.visible));

        view.visible_columns = vec!["status".into()];
        let visible: Vec<_> = view
            .columns_for(&panel)
            .into_iter()
            .filter(|c| c.visible)
            .map(|c| c.id)
            .collect();
        assert_eq!(visible, vec!["status"]);
    }

    #[test]
    fn test_prune_column() {
        let mut view = View::new("v1", "p1", "View");
        view.filters.push(Filter {
            column_id: "status".into(),
            operator: FilterOperator::Equals,
            value: json!("ready"),
        });
        view.sorts.push(Sort {
            column_id: "due".into(),
            direction: SortDirection::Desc,
        });
        view.visible_columns = vec!["status".into(), "due".into()];

        assert!(view.prune_column("status"));
        assert!(view.filters.is_empty());
        assert_eq!(view.visible_columns, vec!["due"]);
        assert!(!view.prune_column("status"));
    }

    #[test]
    fn test_permission_ordering() {
        assert!(Permission::Owner.allows(Permission::Editor));
        assert!(Permission::Editor.allows(Permission::Viewer));
        assert!(!Permission::Viewer.allows(Permission::Editor));
        assert_eq!("editor".parse::<Permission>().unwrap(), Permission::Editor);
        assert_eq!(serde_json::to_value(Permission::Owner).unwrap(), json!("owner"));
    }

    #[test]
    fn test_panel_json_shape() {
        let panel = task_panel();
        let value = serde_json::to_value(&panel).unwrap();
        assert_eq!(value["dataSource"]["resourceType"], "Task");
        assert_eq!(value["columns"][0]["sourceField"], "description");
        assert_eq!(value["columns"][0]["type"], "text");
        let back: Panel = serde_json::from_value(value).unwrap();
        assert_eq!(back, panel);
    }
}
