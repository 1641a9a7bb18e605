pub mod date_filter;
pub mod error;
pub mod fhir_path;
pub mod model;
pub mod resource;
pub mod table;
pub mod temporal;

pub use date_filter::{parse_week_start, DatePreset, DateRange};
pub use error::{Result, WorklistError};
pub use fhir_path::{EvalContext, FhirPath};
pub use model::{Acl, DataSource, Panel, Permission, ResourceType, View};
pub use resource::{bundle_resources, is_valid_id, next_link, Meta, Resource};
pub use table::{
    display_text, Column, ColumnType, Filter, FilterOperator, Row, Sort, SortDirection,
    TableEngine, TableQuery, TableResult,
};
