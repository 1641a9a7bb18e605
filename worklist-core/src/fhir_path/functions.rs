//! Worklist date helpers registered on the FHIRPath function registry
//!
//! `today()` and `now()` are replaced with clock-pinned versions so every
//! expression in one request sees the same instant.

use chrono::format::{Item as FormatItem, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate};
use num_traits::ToPrimitive;
use octofhir_fhirpath::registry::function::{EvaluationContext, FunctionError, FunctionResult};
use octofhir_fhirpath::registry::FunctionRegistry;
use octofhir_fhirpath::FhirPathValue;

use crate::temporal::{parse_temporal, CalendarUnit, Temporal};

pub(super) fn register(functions: &mut FunctionRegistry, now: DateTime<FixedOffset>) {
    let today = now.date_naive();

    functions.register_simple("today", 0, Some(0), move |_, _| Ok(FhirPathValue::Date(today)));
    functions.register_simple("now", 0, Some(0), move |_, _| Ok(FhirPathValue::DateTime(now)));

    functions.register_simple("addToDate", 2, Some(2), |args, ctx| {
        let amount = integer_arg("addToDate", args, 0)?;
        shift_input("addToDate", ctx, amount, unit_arg("addToDate", args, 1)?)
    });
    functions.register_simple("subtractFromDate", 2, Some(2), |args, ctx| {
        let amount = integer_arg("subtractFromDate", args, 0)?
            .checked_neg()
            .ok_or_else(|| failure("subtractFromDate", "date arithmetic overflow"))?;
        shift_input("subtractFromDate", ctx, amount, unit_arg("subtractFromDate", args, 1)?)
    });
    functions.register_simple("dateDiff", 2, Some(2), |args, ctx| {
        let unit = unit_arg("dateDiff", args, 1)?;
        let Some(end) = args.first().and_then(temporal_of) else {
            return Ok(FhirPathValue::Empty);
        };
        Ok(collect(
            temporals(&ctx.input)
                .map(|start| FhirPathValue::Integer(start.diff(&end, unit)))
                .collect(),
        ))
    });

    functions.register_simple("daysSince", 0, Some(0), move |_, ctx| {
        Ok(count_from_today(ctx, today, |day, today| day.diff(&today, CalendarUnit::Day)))
    });
    functions.register_simple("daysUntil", 0, Some(0), move |_, ctx| {
        Ok(count_from_today(ctx, today, |day, today| today.diff(&day, CalendarUnit::Day)))
    });
    functions.register_simple("ageInYears", 0, Some(0), move |_, ctx| {
        Ok(count_from_today(ctx, today, |day, today| day.diff(&today, CalendarUnit::Year)))
    });

    functions.register_simple("formatDate", 1, Some(1), |args, ctx| {
        let pattern = string_arg("formatDate", args, 0)?;
        let items: Vec<FormatItem<'_>> = StrftimeItems::new(&pattern).collect();
        if items.iter().any(|item| matches!(item, FormatItem::Error)) {
            return Err(failure("formatDate", format!("invalid date pattern '{}'", pattern)));
        }
        Ok(collect(
            temporals(&ctx.input)
                .map(|t| {
                    let text = match t {
                        Temporal::Date(d) => d.format_with_items(items.iter()).to_string(),
                        Temporal::DateTime(dt) => dt.format_with_items(items.iter()).to_string(),
                    };
                    FhirPathValue::String(text)
                })
                .collect(),
        ))
    });
}

fn failure(name: &str, message: impl Into<String>) -> FunctionError {
    FunctionError::EvaluationError {
        name: name.to_string(),
        message: message.into(),
    }
}

fn wrong_type(name: &str, index: usize, expected: &str, actual: &FhirPathValue) -> FunctionError {
    FunctionError::InvalidArgumentType {
        name: name.to_string(),
        index,
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}

/// A singleton collection counts as its only item
fn single(value: &FhirPathValue) -> &FhirPathValue {
    match value {
        FhirPathValue::Collection(items) if items.len() == 1 => items.first().map_or(value, single),
        other => other,
    }
}

fn integer_arg(name: &str, args: &[FhirPathValue], index: usize) -> FunctionResult<i64> {
    let arg = args.get(index).map(single).unwrap_or(&FhirPathValue::Empty);
    match arg {
        FhirPathValue::Integer(i) => Ok(*i),
        FhirPathValue::Decimal(d) => d
            .trunc()
            .to_i64()
            .ok_or_else(|| failure(name, "date arithmetic overflow")),
        other => Err(wrong_type(name, index, "Integer", other)),
    }
}

fn string_arg(name: &str, args: &[FhirPathValue], index: usize) -> FunctionResult<String> {
    match args.get(index).map(single) {
        Some(FhirPathValue::String(s)) => Ok(s.clone()),
        Some(other) => Err(wrong_type(name, index, "String", other)),
        None => Err(wrong_type(name, index, "String", &FhirPathValue::Empty)),
    }
}

fn unit_arg(name: &str, args: &[FhirPathValue], index: usize) -> FunctionResult<CalendarUnit> {
    let unit = string_arg(name, args, index)?;
    CalendarUnit::parse(&unit).ok_or_else(|| failure(name, format!("'{}' is not a calendar unit", unit)))
}

fn temporal_of(value: &FhirPathValue) -> Option<Temporal> {
    match single(value) {
        FhirPathValue::Date(d) => Some(Temporal::Date(*d)),
        FhirPathValue::DateTime(dt) => Some(Temporal::DateTime(*dt)),
        FhirPathValue::String(s) => parse_temporal(s),
        _ => None,
    }
}

/// Date-like items of the focus; anything else is skipped
fn temporals(input: &FhirPathValue) -> impl Iterator<Item = Temporal> + '_ {
    let items: Vec<&FhirPathValue> = match input {
        FhirPathValue::Collection(items) => items.iter().collect(),
        FhirPathValue::Empty => Vec::new(),
        other => vec![other],
    };
    items.into_iter().filter_map(temporal_of)
}

fn from_temporal(t: Temporal) -> FhirPathValue {
    match t {
        Temporal::Date(d) => FhirPathValue::Date(d),
        Temporal::DateTime(dt) => FhirPathValue::DateTime(dt),
    }
}

fn collect(mut values: Vec<FhirPathValue>) -> FhirPathValue {
    match values.len() {
        0 => FhirPathValue::Empty,
        1 => values.remove(0),
        _ => FhirPathValue::collection(values),
    }
}

fn shift_input(
    name: &str,
    ctx: &EvaluationContext,
    amount: i64,
    unit: CalendarUnit,
) -> FunctionResult<FhirPathValue> {
    let shifted = temporals(&ctx.input)
        .map(|t| t.shift(amount, unit).map(from_temporal))
        .collect::<crate::Result<Vec<_>>>()
        .map_err(|e| failure(name, e.to_string()))?;
    Ok(collect(shifted))
}

fn count_from_today(
    ctx: &EvaluationContext,
    today: NaiveDate,
    count: impl Fn(Temporal, Temporal) -> i64,
) -> FhirPathValue {
    collect(
        temporals(&ctx.input)
            .map(|t| FhirPathValue::Integer(count(Temporal::Date(t.date()), Temporal::Date(today))))
            .collect(),
    )
}
