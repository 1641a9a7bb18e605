//! Client table engine: turns FHIR resources into rows of column cells and
//! applies filters, free-text search, multi-key sorting and pagination.

use crate::date_filter::{DatePreset, DateRange};
use crate::error::{Result, WorklistError};
use crate::fhir_path::{dotted_path, EvalContext, FhirPath};
use crate::temporal::{parse_temporal, Temporal, TemporalKey};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    Text,
    Number,
    Date,
    DateTime,
    Boolean,
    Select,
    Tags,
    Reference,
}

/// A table column: a FHIRPath expression rendered under a display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub name: String,
    pub source_field: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Free-form display options (select choices, colour hints, ...)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
}

fn default_visible() -> bool {
    true
}

impl Column {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_field: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_field: source_field.into(),
            column_type,
            visible: true,
            width: None,
            properties: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// Inclusive `[low, high]`
    Between,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
    /// Value is a date preset such as `last_7_days`
    DateRange,
    /// Value is a FHIRPath criterion evaluated against the whole resource
    Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Ignored by `Expression` filters
    #[serde(default)]
    pub column_id: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort {
    pub column_id: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableQuery {
    pub filters: Vec<Filter>,
    pub sorts: Vec<Sort>,
    pub search: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: String,
    pub resource_type: String,
    pub cells: BTreeMap<String, Value>,
    pub resource: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableResult {
    pub total: usize,
    pub rows: Vec<Row>,
}

impl Filter {
    /// Check the value has the shape the operator needs; column existence is checked elsewhere
    pub fn validate(&self) -> Result<()> {
        match self.operator {
            FilterOperator::Expression => {
                let source = self.value.as_str().ok_or_else(|| {
                    WorklistError::validation("expression filter value must be a string")
                })?;
                FhirPath::compile(source)?;
            }
            FilterOperator::DateRange => {
                self.date_preset()?;
            }
            FilterOperator::Between => {
                if !matches!(self.value.as_array(), Some(bounds) if bounds.len() == 2) {
                    return Err(WorklistError::validation(
                        "between filter value must be [low, high]",
                    ));
                }
            }
            FilterOperator::In | FilterOperator::NotIn => {
                if !self.value.is_array() {
                    return Err(WorklistError::validation(
                        "in / not_in filter value must be an array",
                    ));
                }
            }
            _ => {}
        }
        if self.operator != FilterOperator::Expression && self.column_id.trim().is_empty() {
            return Err(WorklistError::validation("filter needs a columnId"));
        }
        Ok(())
    }

    fn date_preset(&self) -> Result<DatePreset> {
        self.value
            .as_str()
            .ok_or_else(|| WorklistError::InvalidDateFilter(self.value.to_string()))?
            .parse()
    }
}

struct CompiledColumn {
    column: Column,
    /// `None` when the expression does not parse; cells then use dotted navigation
    path: Option<FhirPath>,
}

enum Matcher {
    Cell {
        column: usize,
        operator: FilterOperator,
        value: Value,
    },
    Range {
        column: usize,
        range: DateRange,
    },
    Expression(FhirPath),
}

pub struct TableEngine {
    columns: Vec<CompiledColumn>,
    ctx: EvalContext,
    week_start: Weekday,
}

impl TableEngine {
    pub fn new(columns: &[Column], ctx: EvalContext) -> Self {
        let columns = columns
            .iter()
            .map(|column| {
                let path = match FhirPath::compile(&column.source_field) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!(
                            column = %column.id,
                            source_field = %column.source_field,
                            error = %e,
                            "Column expression does not parse"
                        );
                        None
                    }
                };
                CompiledColumn {
                    column: column.clone(),
                    path,
                }
            })
            .collect();

        Self {
            columns,
            ctx,
            week_start: Weekday::Mon,
        }
    }

    pub fn with_week_start(mut self, week_start: Weekday) -> Self {
        self.week_start = week_start;
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().map(|c| &c.column)
    }

    fn column_index(&self, id: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.column.id == id)
            .ok_or_else(|| WorklistError::UnknownColumn(id.to_string()))
    }

    /// Resolve every column of one resource
    pub async fn build_row(&self, resource: &Value) -> Row {
        let mut cells = BTreeMap::new();
        for compiled in &self.columns {
            let value = match &compiled.path {
                Some(path) => path
                    .evaluate_json(resource, &self.ctx)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::debug!(
                            column = %compiled.column.id,
                            error = %e,
                            "Column evaluation failed"
                        );
                        Value::Null
                    }),
                None => dotted_path(resource, &compiled.column.source_field),
            };
            cells.insert(compiled.column.id.clone(), value);
        }

        Row {
            id: json_str(resource, "id"),
            resource_type: json_str(resource, "resourceType"),
            cells,
            resource: resource.clone(),
        }
    }

    pub async fn build_rows(&self, resources: &[Value]) -> Vec<Row> {
        let mut rows = Vec::with_capacity(resources.len());
        for resource in resources {
            rows.push(self.build_row(resource).await);
        }
        rows
    }

    /// Filter, search, sort, then paginate. `total` counts rows before pagination.
    pub async fn apply(&self, rows: Vec<Row>, query: &TableQuery) -> Result<TableResult> {
        let matchers = query
            .filters
            .iter()
            .map(|f| self.prepare(f))
            .collect::<Result<Vec<_>>>()?;
        let sort_keys = query
            .sorts
            .iter()
            .map(|s| Ok((self.column_index(&s.column_id)?, s.direction)))
            .collect::<Result<Vec<_>>>()?;
        let search = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut matched = Vec::with_capacity(rows.len());
        for row in rows {
            if !self.row_matches(&row, &matchers).await? {
                continue;
            }
            if let Some(term) = &search
                && !self.search_matches(&row, term)
            {
                continue;
            }
            matched.push(row);
        }

        let matched = self.sort_rows(matched, &sort_keys);

        let total = matched.len();
        let rows = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(TableResult { total, rows })
    }

    fn prepare(&self, filter: &Filter) -> Result<Matcher> {
        filter.validate()?;
        match filter.operator {
            FilterOperator::Expression => {
                let source = filter.value.as_str().unwrap_or_default();
                Ok(Matcher::Expression(FhirPath::compile(source)?))
            }
            FilterOperator::DateRange => Ok(Matcher::Range {
                column: self.column_index(&filter.column_id)?,
                range: filter
                    .date_preset()?
                    .resolve(self.ctx.today(), self.week_start)?,
            }),
            operator => Ok(Matcher::Cell {
                column: self.column_index(&filter.column_id)?,
                operator,
                value: filter.value.clone(),
            }),
        }
    }

    async fn row_matches(&self, row: &Row, matchers: &[Matcher]) -> Result<bool> {
        for matcher in matchers {
            let ok = match matcher {
                Matcher::Expression(path) => path.matches(&row.resource, &self.ctx).await?,
                Matcher::Range { column, range } => {
                    range.matches_value(self.cell(row, *column))
                }
                Matcher::Cell {
                    column,
                    operator,
                    value,
                } => {
                    let ty = self.columns[*column].column.column_type;
                    cell_matches(self.cell(row, *column), *operator, value, ty)
                }
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn cell<'r>(&self, row: &'r Row, column: usize) -> &'r Value {
        row.cells
            .get(&self.columns[column].column.id)
            .unwrap_or(&Value::Null)
    }

    /// Case-insensitive substring search over visible columns; `term` must already be lowercase
    pub fn search_matches(&self, row: &Row, term: &str) -> bool {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.column.visible)
            .any(|(i, _)| {
                display_text(self.cell(row, i))
                    .is_some_and(|text| text.to_lowercase().contains(term))
            })
    }

    /// Stable multi-key sort; every cell is reduced to a [`SortKey`] first
    fn sort_rows(&self, rows: Vec<Row>, keys: &[(usize, SortDirection)]) -> Vec<Row> {
        if keys.is_empty() {
            return rows;
        }
        let mut keyed: Vec<(Vec<Option<SortKey>>, Row)> = rows
            .into_iter()
            .map(|row| {
                let cells = keys
                    .iter()
                    .map(|(column, _)| {
                        let ty = self.columns[*column].column.column_type;
                        first_value(self.cell(&row, *column)).and_then(|v| SortKey::of(v, ty))
                    })
                    .collect();
                (cells, row)
            })
            .collect();

        keyed.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .zip(keys)
                .map(|((x, y), (_, direction))| sort_order(x.as_ref(), y.as_ref(), *direction))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        keyed.into_iter().map(|(_, row)| row).collect()
    }
}

fn json_str(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Human readable text of a cell, as shown in the table
pub fn display_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(display_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(map) => ["display", "text", "name", "reference", "value", "code"]
            .iter()
            .find_map(|key| map.get(*key).and_then(display_text))
            .or_else(|| {
                map.get("coding")
                    .and_then(|c| c.as_array())
                    .and_then(|codings| codings.iter().find_map(display_text))
            }),
    }
}

fn cell_values(cell: &Value) -> Vec<&Value> {
    match cell {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().filter(|v| !v.is_null()).collect(),
        other => vec![other],
    }
}

fn first_value(cell: &Value) -> Option<&Value> {
    cell_values(cell).into_iter().next()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn cell_matches(cell: &Value, operator: FilterOperator, target: &Value, ty: ColumnType) -> bool {
    let values = cell_values(cell);
    let needle = display_text(target).map(|s| s.to_lowercase()).unwrap_or_default();
    let any_text = |pred: &dyn Fn(&str) -> bool| {
        values
            .iter()
            .any(|&v| display_text(v).is_some_and(|t| pred(&t.to_lowercase())))
    };
    let any_ordered = |accept: fn(Ordering) -> bool| {
        values
            .iter()
            .any(|&v| typed_compare(v, target, ty).is_some_and(accept))
    };
    let any_equal = |candidate: &Value| values.iter().any(|&v| typed_equals(v, candidate, ty));

    match operator {
        FilterOperator::IsEmpty => values.iter().all(|&v| is_blank(v)),
        FilterOperator::IsNotEmpty => !values.iter().all(|&v| is_blank(v)),
        FilterOperator::Equals => any_equal(target),
        FilterOperator::NotEquals => !any_equal(target),
        FilterOperator::Contains => any_text(&|t| t.contains(&needle)),
        FilterOperator::NotContains => !any_text(&|t| t.contains(&needle)),
        FilterOperator::StartsWith => any_text(&|t| t.starts_with(&needle)),
        FilterOperator::EndsWith => any_text(&|t| t.ends_with(&needle)),
        FilterOperator::GreaterThan => any_ordered(Ordering::is_gt),
        FilterOperator::GreaterThanOrEqual => any_ordered(Ordering::is_ge),
        FilterOperator::LessThan => any_ordered(Ordering::is_lt),
        FilterOperator::LessThanOrEqual => any_ordered(Ordering::is_le),
        FilterOperator::Between => {
            let Some([low, high]) = target.as_array().map(Vec::as_slice) else {
                return false;
            };
            values.iter().any(|&v| {
                typed_compare(v, low, ty).is_some_and(Ordering::is_ge)
                    && typed_compare(v, high, ty).is_some_and(Ordering::is_le)
            })
        }
        FilterOperator::In => target
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(any_equal)),
        FilterOperator::NotIn => !target
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(any_equal)),
        // Prepared separately
        FilterOperator::DateRange | FilterOperator::Expression => true,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => map.get("value").and_then(as_number),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_temporal(value: &Value) -> Option<Temporal> {
    value.as_str().and_then(parse_temporal)
}

/// Filter comparison; `None` when the values are not comparable
fn typed_compare(a: &Value, b: &Value, ty: ColumnType) -> Option<Ordering> {
    match ty {
        ColumnType::Number => as_number(a)?.partial_cmp(&as_number(b)?),
        ColumnType::Date | ColumnType::DateTime => Some(as_temporal(a)?.compare(&as_temporal(b)?)),
        ColumnType::Boolean => Some(as_bool(a)?.cmp(&as_bool(b)?)),
        _ => match (a, b) {
            (Value::String(x), Value::String(y)) => match (parse_temporal(x), parse_temporal(y)) {
                (Some(tx), Some(ty)) => Some(tx.compare(&ty)),
                _ => Some(x.to_lowercase().cmp(&y.to_lowercase())),
            },
            (Value::Number(_), Value::Number(_)) => as_number(a)?.partial_cmp(&as_number(b)?),
            (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn typed_equals(a: &Value, b: &Value, ty: ColumnType) -> bool {
    match ty {
        ColumnType::Number | ColumnType::Date | ColumnType::DateTime | ColumnType::Boolean => {
            typed_compare(a, b, ty) == Some(Ordering::Equal)
        }
        _ => match (display_text(a), display_text(b)) {
            (Some(x), Some(y)) => x.to_lowercase() == y.to_lowercase(),
            _ => false,
        },
    }
}

/// Sort key of one cell. Keys of different kinds order by kind, so a column
/// mixing numbers, dates and text still sorts consistently.
#[derive(Debug, Clone)]
enum SortKey {
    Bool(bool),
    Number(f64),
    Temporal(TemporalKey),
    Text(String),
}

impl SortKey {
    /// `None` for blank cells
    fn of(value: &Value, ty: ColumnType) -> Option<Self> {
        if is_blank(value) {
            return None;
        }
        let typed = match ty {
            ColumnType::Number => as_number(value).map(SortKey::Number),
            ColumnType::Date | ColumnType::DateTime => {
                as_temporal(value).map(|t| SortKey::Temporal(t.sort_key()))
            }
            ColumnType::Boolean => as_bool(value).map(SortKey::Bool),
            _ => None,
        };
        typed.or_else(|| {
            Some(match value {
                Value::Bool(b) => SortKey::Bool(*b),
                Value::Number(n) => SortKey::Number(n.as_f64().unwrap_or_default()),
                other => match as_temporal(other) {
                    Some(t) => SortKey::Temporal(t.sort_key()),
                    None => SortKey::Text(display_text(other).unwrap_or_default().to_lowercase()),
                },
            })
        })
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Bool(_) => 0,
            SortKey::Number(_) => 1,
            SortKey::Temporal(_) => 2,
            SortKey::Text(_) => 3,
        }
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Bool(a), SortKey::Bool(b)) => a.cmp(b),
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Temporal(a), SortKey::Temporal(b)) => a.cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Empty cells go last in both directions
fn sort_order(a: Option<&SortKey>, b: Option<&SortKey>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => match direction {
            SortDirection::Asc => x.cmp(y),
            SortDirection::Desc => y.cmp(x),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContext::at(DateTime::parse_from_rfc3339("2024-03-15T09:30:00Z").unwrap())
    }

    fn columns() -> Vec<Column> {
        vec![
            Column::new("name", "Name", "name.where(use = 'official').family", ColumnType::Text),
            Column::new("dob", "Birth date", "birthDate", ColumnType::Date),
            Column::new("age", "Age", "birthDate.ageInYears()", ColumnType::Number),
            Column::new("active", "Active", "active", ColumnType::Boolean),
            Column::new("tags", "Tags", "meta.tag.code", ColumnType::Tags),
            Column {
                visible: false,
                ..Column::new("mrn", "MRN", "identifier.value", ColumnType::Text)
            },
        ]
    }

    fn patients() -> Vec<Value> {
        vec![
            json!({
                "resourceType": "Patient", "id": "a", "active": true,
                "birthDate": "1980-05-01",
                "name": [{"use": "official", "family": "Zimmer"}],
                "meta": {"tag": [{"code": "vip"}, {"code": "fall-risk"}]},
                "identifier": [{"value": "MRN-001"}]
            }),
            json!({
                "resourceType": "Patient", "id": "b", "active": false,
                "birthDate": "2001-11-23",
                "name": [{"use": "official", "family": "adams"}],
                "identifier": [{"value": "MRN-002"}]
            }),
            json!({
                "resourceType": "Patient", "id": "c", "active": true,
                "name": [{"use": "official", "family": "Baker"}],
                "meta": {"tag": [{"code": "vip"}]}
            }),
        ]
    }

    async fn run(query: TableQuery) -> TableResult {
        let engine = TableEngine::new(&columns(), ctx());
        let rows = engine.build_rows(&patients()).await;
        engine.apply(rows, &query).await.unwrap()
    }

    fn ids(result: &TableResult) -> Vec<&str> {
        result.rows.iter().map(|r| r.id.as_str()).collect()
    }

    fn filter(column: &str, operator: FilterOperator, value: Value) -> Filter {
        Filter {
            column_id: column.to_string(),
            operator,
            value,
        }
    }

    #[tokio::test]
    async fn test_build_row_cells() {
        let engine = TableEngine::new(&columns(), ctx());
        let row = engine.build_row(&patients()[0]).await;
        assert_eq!(row.id, "a");
        assert_eq!(row.resource_type, "Patient");
        assert_eq!(row.cells["name"], json!("Zimmer"));
        assert_eq!(row.cells["age"], json!(43));
        assert_eq!(row.cells["tags"], json!(["vip", "fall-risk"]));
    }

    #[tokio::test]
    async fn test_unparseable_column_uses_dotted_path() {
        let columns = vec![Column::new("bad", "Bad", "name.family.", ColumnType::Text)];
        let engine = TableEngine::new(&columns, ctx());
        let row = engine.build_row(&patients()[0]).await;
        assert_eq!(row.cells["bad"], Value::Null);
    }

    #[tokio::test]
    async fn test_equals_is_case_insensitive_for_text() {
        let result = run(TableQuery {
            filters: vec![filter("name", FilterOperator::Equals, json!("ADAMS"))],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["b"]);
    }

    #[tokio::test]
    async fn test_array_cells_match_any_element() {
        let result = run(TableQuery {
            filters: vec![filter("tags", FilterOperator::Equals, json!("fall-risk"))],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a"]);

        let result = run(TableQuery {
            filters: vec![filter("tags", FilterOperator::NotContains, json!("vip"))],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["b"]);
    }

    #[tokio::test]
    async fn test_numeric_and_date_comparisons() {
        let result = run(TableQuery {
            filters: vec![filter("age", FilterOperator::GreaterThanOrEqual, json!(40))],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a"]);

        let result = run(TableQuery {
            filters: vec![filter("dob", FilterOperator::LessThan, json!("2000-01-01"))],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a"]);

        let result = run(TableQuery {
            filters: vec![filter(
                "dob",
                FilterOperator::Between,
                json!(["1970-01-01", "2010-12-31"]),
            )],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_checks() {
        let result = run(TableQuery {
            filters: vec![filter("dob", FilterOperator::IsEmpty, Value::Null)],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["c"]);

        let result = run(TableQuery {
            filters: vec![filter("tags", FilterOperator::IsNotEmpty, Value::Null)],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_boolean_and_in_filters() {
        let result = run(TableQuery {
            filters: vec![filter("active", FilterOperator::Equals, json!("true"))],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a", "c"]);

        let result = run(TableQuery {
            filters: vec![filter("name", FilterOperator::In, json!(["baker", "adams"]))],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_filters_combine_with_and() {
        let result = run(TableQuery {
            filters: vec![
                filter("active", FilterOperator::Equals, json!(true)),
                filter("tags", FilterOperator::Contains, json!("fall")),
            ],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a"]);
    }

    #[tokio::test]
    async fn test_date_range_filter() {
        let result = run(TableQuery {
            filters: vec![filter("dob", FilterOperator::DateRange, json!("custom:2000-01-01.."))],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["b"]);
    }

    #[tokio::test]
    async fn test_expression_filter() {
        let result = run(TableQuery {
            filters: vec![filter(
                "",
                FilterOperator::Expression,
                json!("meta.tag.code contains 'vip' and birthDate.exists()"),
            )],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a"]);
    }

    #[tokio::test]
    async fn test_search_only_visible_columns() {
        let result = run(TableQuery {
            search: Some("  zim ".into()),
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a"]);

        // MRN is hidden
        let result = run(TableQuery {
            search: Some("MRN-002".into()),
            ..Default::default()
        })
        .await;
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_sort_text_case_insensitive() {
        let result = run(TableQuery {
            sorts: vec![Sort {
                column_id: "name".into(),
                direction: SortDirection::Asc,
            }],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_sort_empty_values_last_both_directions() {
        for direction in [SortDirection::Asc, SortDirection::Desc] {
            let result = run(TableQuery {
                sorts: vec![Sort {
                    column_id: "dob".into(),
                    direction,
                }],
                ..Default::default()
            })
            .await;
            assert_eq!(ids(&result).last(), Some(&"c"));
        }
    }

    #[tokio::test]
    async fn test_multi_key_sort_is_stable() {
        let result = run(TableQuery {
            sorts: vec![
                Sort {
                    column_id: "active".into(),
                    direction: SortDirection::Desc,
                },
                Sort {
                    column_id: "name".into(),
                    direction: SortDirection::Desc,
                },
            ],
            ..Default::default()
        })
        .await;
        assert_eq!(ids(&result), vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_pagination_reports_total() {
        let result = run(TableQuery {
            offset: 1,
            limit: Some(1),
            ..Default::default()
        })
        .await;
        assert_eq!(result.total, 3);
        assert_eq!(ids(&result), vec!["b"]);
    }

    #[tokio::test]
    async fn test_unknown_column_is_an_error() {
        let engine = TableEngine::new(&columns(), ctx());
        let query = TableQuery {
            sorts: vec![Sort {
                column_id: "nope".into(),
                direction: SortDirection::Asc,
            }],
            ..Default::default()
        };
        assert!(matches!(
            engine.apply(Vec::new(), &query).await,
            Err(WorklistError::UnknownColumn(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_filter_values() {
        let engine = TableEngine::new(&columns(), ctx());
        let between = TableQuery {
            filters: vec![filter("age", FilterOperator::Between, json!(5))],
            ..Default::default()
        };
        assert!(engine.apply(Vec::new(), &between).await.is_err());

        let range = TableQuery {
            filters: vec![filter("dob", FilterOperator::DateRange, json!("someday"))],
            ..Default::default()
        };
        assert!(engine.apply(Vec::new(), &range).await.is_err());
    }

    #[test]
    fn test_display_text_for_complex_values() {
        assert_eq!(
            display_text(&json!({"coding": [{"system": "x", "display": "Fever"}]})),
            Some("Fever".into())
        );
        assert_eq!(
            display_text(&json!({"reference": "Patient/1"})),
            Some("Patient/1".into())
        );
        assert_eq!(display_text(&json!([1, 2])), Some("1, 2".into()));
    }

    fn sort_by(column: &str, direction: SortDirection) -> TableQuery {
        TableQuery {
            sorts: vec![Sort {
                column_id: column.into(),
                direction,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sort_mixed_dates_and_datetimes() {
        let due = [
            "2024-01-10T23:00:00Z",
            "2024-01-10",
            "2024-01-10T01:00:00Z",
            "2024-01-09T12:00:00Z",
            "2024-01-11",
            "2024-01-10T12:00:00Z",
        ];
        let tasks: Vec<Value> = (0..60)
            .map(|i| {
                json!({
                    "resourceType": "Task",
                    "id": format!("t{}", i),
                    "restriction": {"period": {"end": due[i % due.len()]}}
                })
            })
            .collect();
        let columns = vec![Column::new(
            "due",
            "Due",
            "restriction.period.end",
            ColumnType::DateTime,
        )];
        let engine = TableEngine::new(&columns, ctx());
        let rows = engine.build_rows(&tasks).await;
        let result = engine
            .apply(rows, &sort_by("due", SortDirection::Asc))
            .await
            .unwrap();

        let order: Vec<String> = result
            .rows
            .iter()
            .map(|row| row.resource["restriction"]["period"]["end"].as_str().unwrap().to_string())
            .collect();
        let mut expected = Vec::new();
        for value in [
            "2024-01-09T12:00:00Z",
            "2024-01-10",
            "2024-01-10T01:00:00Z",
            "2024-01-10T12:00:00Z",
            "2024-01-10T23:00:00Z",
            "2024-01-11",
        ] {
            expected.extend(std::iter::repeat_n(value.to_string(), 10));
        }
        assert_eq!(order, expected);
        // Ties keep their input order
        assert_eq!(result.rows[0].id, "t3");
        assert_eq!(result.rows[1].id, "t9");
    }

    #[tokio::test]
    async fn test_sort_text_column_with_mixed_values() {
        let resources = vec![
            json!({"resourceType": "Basic", "id": "a", "code": {"text": "zebra"}}),
            json!({"resourceType": "Basic", "id": "b", "code": {"text": "2024-05-01"}}),
            json!({"resourceType": "Basic", "id": "c"}),
            json!({"resourceType": "Basic", "id": "d", "code": {"text": "Apple"}}),
            json!({"resourceType": "Basic", "id": "e", "code": {"text": "2023-01-01T10:00:00Z"}}),
        ];
        let columns = vec![Column::new("code", "Code", "code.text", ColumnType::Text)];
        let engine = TableEngine::new(&columns, ctx());
        let rows = engine.build_rows(&resources).await;
        let asc = engine
            .apply(rows.clone(), &sort_by("code", SortDirection::Asc))
            .await
            .unwrap();
        assert_eq!(ids(&asc), vec!["e", "b", "d", "a", "c"]);
        let desc = engine
            .apply(rows, &sort_by("code", SortDirection::Desc))
            .await
            .unwrap();
        assert_eq!(ids(&desc), vec!["a", "d", "b", "e", "c"]);
    }

    #[test]
    fn test_filter_validate() {
        assert!(filter("due", FilterOperator::DateRange, json!("last_7_days")).validate().is_ok());
        assert!(matches!(
            filter("due", FilterOperator::DateRange, json!("someday")).validate(),
            Err(WorklistError::InvalidDateFilter(_))
        ));
        assert!(filter("due", FilterOperator::DateRange, json!(7)).validate().is_err());
        assert!(filter("age", FilterOperator::Between, json!([1])).validate().is_err());
        assert!(filter("tags", FilterOperator::In, json!("vip")).validate().is_err());
        assert!(filter("", FilterOperator::Equals, json!("x")).validate().is_err());
        assert!(filter("", FilterOperator::Expression, json!("status = 'ready'")).validate().is_ok());
        assert!(filter("", FilterOperator::Expression, json!("status = ")).validate().is_err());
        assert!(filter("name", FilterOperator::IsEmpty, Value::Null).validate().is_ok());
    }

    #[tokio::test]
    async fn test_huge_rolling_window_is_rejected() {
        let engine = TableEngine::new(&columns(), ctx());
        let query = TableQuery {
            filters: vec![filter("dob", FilterOperator::DateRange, json!("last_100000000_days"))],
            ..Default::default()
        };
        assert!(matches!(
            engine.apply(Vec::new(), &query).await,
            Err(WorklistError::InvalidDateFilter(_))
        ));
    }
}
