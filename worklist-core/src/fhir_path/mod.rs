//! FHIRPath evaluation over FHIR JSON resources
//!
//! Parsing and evaluation are done by `octofhir-fhirpath`; this module pins
//! the clock, registers the worklist date helpers (`addToDate`,
//! `subtractFromDate`, `dateDiff`, `daysSince`, `daysUntil`, `ageInYears`,
//! `formatDate`) and converts results back into JSON.

mod functions;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use num_traits::ToPrimitive;
use octofhir_fhirpath::ast::ExpressionNode;
use octofhir_fhirpath::registry::create_standard_registries;
use octofhir_fhirpath::{FhirPathEngine, FhirPathValue};
use serde_json::{json, Number, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, WorklistError};
use crate::temporal::format_datetime;

/// Deepest bracket / prefix-operator nesting accepted by [`FhirPath::compile`]
pub const MAX_NESTING_DEPTH: usize = 128;

/// Evaluation environment: the clock and an engine whose `today()` / `now()` read it
#[derive(Clone)]
pub struct EvalContext {
    now: DateTime<FixedOffset>,
    engine: Arc<FhirPathEngine>,
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext").field("now", &self.now).finish()
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalContext {
    /// Context on the system clock
    pub fn new() -> Self {
        Self::at(Utc::now().fixed_offset())
    }

    /// Context pinned to a fixed instant
    pub fn at(now: DateTime<FixedOffset>) -> Self {
        let (mut functions, operators) = create_standard_registries();
        functions::register(&mut functions, now);
        Self {
            now,
            engine: Arc::new(FhirPathEngine::with_registries(
                Arc::new(functions),
                Arc::new(operators),
            )),
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }

    /// Calendar day of `now` in its own offset
    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

/// A parsed expression, reusable across resources
#[derive(Clone)]
pub struct FhirPath {
    source: String,
    ast: ExpressionNode,
}

impl fmt::Debug for FhirPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FhirPath").field(&self.source).finish()
    }
}

impl FhirPath {
    pub fn compile(source: &str) -> Result<Self> {
        check_nesting(source)?;
        let ast = octofhir_fhirpath::parse(source).map_err(|e| WorklistError::parse(0, e.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `resource`; the result is flattened into JSON items
    pub async fn evaluate(&self, resource: &Value, ctx: &EvalContext) -> Result<Vec<Value>> {
        let input = FhirPathValue::from(resource.clone());
        let result = ctx
            .engine
            .evaluate(&self.ast, input)
            .map_err(|e| WorklistError::eval(e.to_string()))?;
        let mut items = Vec::new();
        push_json(&mut items, &result);
        Ok(items)
    }

    /// Evaluate and collapse the result to JSON (see [`collection_to_json`])
    pub async fn evaluate_json(&self, resource: &Value, ctx: &EvalContext) -> Result<Value> {
        Ok(collection_to_json(&self.evaluate(resource, ctx).await?))
    }

    /// Evaluate as a boolean criterion; empty results count as false
    pub async fn matches(&self, resource: &Value, ctx: &EvalContext) -> Result<bool> {
        match self.evaluate(resource, ctx).await?.as_slice() {
            [] => Ok(false),
            [Value::Bool(b)] => Ok(*b),
            [_] => Ok(true),
            items => Err(WorklistError::eval(format!(
                "'{}' returned {} items where a boolean was expected",
                self.source,
                items.len()
            ))),
        }
    }
}

/// Parse and evaluate in one step
pub async fn evaluate(expression: &str, resource: &Value, ctx: &EvalContext) -> Result<Vec<Value>> {
    FhirPath::compile(expression)?.evaluate(resource, ctx).await
}

/// Reject expressions whose brackets or prefix operators nest beyond [`MAX_NESTING_DEPTH`]
fn check_nesting(source: &str) -> Result<()> {
    let mut depth = 0usize;
    let mut prefix_run = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    // Start of input, an open bracket, a comma or an operator
    let mut expects_operand = true;

    for (position, c) in source.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
                expects_operand = false;
            }
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        match c {
            '\'' | '`' => {
                quote = Some(c);
                prefix_run = 0;
            }
            '(' | '[' | '{' => {
                depth += 1;
                expects_operand = true;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                prefix_run = 0;
                expects_operand = false;
            }
            '-' | '+' if expects_operand => prefix_run += 1,
            ',' | '-' | '+' | '*' | '/' | '&' | '|' | '=' | '!' | '<' | '>' | '~' => {
                expects_operand = true;
            }
            _ => {
                prefix_run = 0;
                expects_operand = false;
            }
        }
        if depth + prefix_run > MAX_NESTING_DEPTH {
            return Err(WorklistError::parse(
                position,
                format!("expression nests deeper than {} levels", MAX_NESTING_DEPTH),
            ));
        }
    }
    Ok(())
}

/// Append the JSON form of a FHIRPath value, flattening collections
fn push_json(out: &mut Vec<Value>, value: &FhirPathValue) {
    match value {
        FhirPathValue::Empty => {}
        FhirPathValue::Collection(items) => {
            for item in items.iter() {
                push_json(out, item);
            }
        }
        FhirPathValue::Boolean(b) => out.push(Value::Bool(*b)),
        FhirPathValue::Integer(i) => out.push(Value::Number((*i).into())),
        FhirPathValue::Decimal(d) => out.push(decimal_json(d.to_f64())),
        FhirPathValue::String(s) => out.push(Value::String(s.clone())),
        FhirPathValue::Date(d) => out.push(Value::String(d.format("%Y-%m-%d").to_string())),
        FhirPathValue::DateTime(dt) => out.push(Value::String(format_datetime(dt))),
        FhirPathValue::Time(t) => out.push(Value::String(t.format("%H:%M:%S").to_string())),
        FhirPathValue::Quantity(q) => out.push(json!({
            "value": decimal_json(q.value.to_f64()),
            "unit": q.unit.as_deref(),
        })),
        other => out.push(Value::from(other.clone())),
    }
}

fn decimal_json(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// `null` for an empty collection, the value itself for one item, an array otherwise
pub fn collection_to_json(items: &[Value]) -> Value {
    match items {
        [] => Value::Null,
        [item] => item.clone(),
        items => Value::Array(items.to_vec()),
    }
}

/// Nested value resolver used by table cells and detail views.
///
/// Evaluation errors are logged and fall back to plain dotted navigation so a
/// column with a malformed expression still renders whatever it can reach.
pub async fn resolve(resource: &Value, path: &str, ctx: &EvalContext) -> Value {
    match evaluate(path, resource, ctx).await {
        Ok(items) => collection_to_json(&items),
        Err(e) => {
            tracing::debug!(path = path, error = %e, "FHIRPath failed, using dotted path");
            dotted_path(resource, path)
        }
    }
}

/// Walk `a.b.c` member by member, flattening arrays and skipping a leading resource type
pub fn dotted_path(resource: &Value, path: &str) -> Value {
    let mut focus = Vec::new();
    flatten_into(&mut focus, resource);
    for (i, segment) in path.split('.').enumerate() {
        let segment = segment.trim();
        if segment.is_empty() {
            return Value::Null;
        }
        let names_type = !focus.is_empty()
            && focus
                .iter()
                .all(|v| v.get("resourceType").and_then(|t| t.as_str()) == Some(segment));
        if i == 0 && names_type {
            continue;
        }
        let mut next = Vec::new();
        for node in &focus {
            if let Some(child) = member(node, segment) {
                flatten_into(&mut next, child);
            }
        }
        focus = next;
    }
    collection_to_json(&focus)
}

/// `deceased` also finds choice elements such as `deceasedBoolean`
fn member<'v>(node: &'v Value, name: &str) -> Option<&'v Value> {
    let object = node.as_object()?;
    object.get(name).or_else(|| {
        object.iter().find_map(|(key, value)| {
            key.strip_prefix(name)
                .filter(|suffix| suffix.starts_with(|c: char| c.is_ascii_uppercase()))
                .map(|_| value)
        })
    })
}

fn flatten_into(out: &mut Vec<Value>, value: &Value) {
    match value {
        Value::Null => {}
        Value::Array(items) => items.iter().for_each(|item| flatten_into(out, item)),
        other => out.push(other.clone()),
    }
}
