use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::CanopyError;
use crate::params::{ParamBag, ResolvedParams};
use crate::plan::ReadPlan;
use crate::query::{ConfidenceBuckets, ConfidenceMode, Row};
use crate::registry::WidgetDescriptor;
use crate::router::DataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Count,
    Hectares,
    Number,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub unit: Unit,
}

impl Column {
    pub fn new(name: &str, unit: Unit) -> Self {
        Self {
            name: name.to_string(),
            unit,
        }
    }

    pub fn count(name: &str) -> Self {
        Self::new(name, Unit::Count)
    }

    pub fn hectares(name: &str) -> Self {
        Self::new(name, Unit::Hectares)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, Unit::Number)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, Unit::Text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Field {
    Count(i64),
    Hectares(f64),
    Number(f64),
    Text(String),
}

impl Field {
    pub fn as_f64(&self) -> f64 {
        match self {
            Field::Count(value) => *value as f64,
            Field::Hectares(value) | Field::Number(value) => *value,
            Field::Text(_) => 0.0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Field::Count(value) => *value,
            Field::Hectares(value) | Field::Number(value) => value.round() as i64,
            Field::Text(_) => 0,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Field::Text(value) => Some(value),
            _ => None,
        }
    }
}

pub type TypedRow = BTreeMap<String, Field>;
pub type Responses = BTreeMap<String, Vec<TypedRow>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfidenceBreakdown {
    pub buckets: ConfidenceBuckets,
    pub mode: ConfidenceMode,
    pub total: i64,
}

impl ConfidenceBreakdown {
    pub fn new(buckets: ConfidenceBuckets, mode: ConfidenceMode) -> Self {
        Self {
            buckets,
            mode,
            total: buckets.total(mode),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisData {
    pub series: BTreeMap<String, Vec<TypedRow>>,
    pub totals: BTreeMap<String, Field>,
    pub confidence: Option<ConfidenceBreakdown>,
    pub served_range: Option<DateRange>,
}

impl AnalysisData {
    pub fn total(&self, key: &str) -> Option<&Field> {
        self.totals.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptionBounds {
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub years: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shaped {
    pub data: AnalysisData,
    pub settings: ParamBag,
    pub options: OptionBounds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub source: DataSource,
    pub data: AnalysisData,
    pub settings: ParamBag,
    pub options: OptionBounds,
}

impl AnalysisResult {
    pub fn empty(source: DataSource, settings: ParamBag) -> Self {
        Self {
            source,
            data: AnalysisData::default(),
            settings,
            options: OptionBounds::default(),
        }
    }
}

pub fn rows<'a>(responses: &'a Responses, name: &str) -> &'a [TypedRow] {
    responses.get(name).map(Vec::as_slice).unwrap_or(&[])
}

pub fn sum(rows: &[TypedRow], column: &str) -> f64 {
    rows.iter()
        .filter_map(|row| row.get(column))
        .map(Field::as_f64)
        .sum()
}

pub fn sum_count(rows: &[TypedRow], column: &str) -> i64 {
    rows.iter()
        .filter_map(|row| row.get(column))
        .map(Field::as_i64)
        .sum()
}

pub fn first(rows: &[TypedRow], column: &str) -> f64 {
    rows.first()
        .and_then(|row| row.get(column))
        .map(Field::as_f64)
        .unwrap_or(0.0)
}

pub fn confidence_buckets(rows: &[TypedRow], tag: &str, count: &str) -> ConfidenceBuckets {
    ConfidenceBuckets::from_pairs(rows.iter().map(|row| {
        (
            row.get(tag).and_then(Field::as_text),
            row.get(count).map(Field::as_i64).unwrap_or(0),
        )
    }))
}

fn normalize_cell(column: &Column, value: Option<&Value>) -> Result<Field, CanopyError> {
    let mismatch = |value: &Value| {
        CanopyError::Normalization(format!(
            "column {} expected {:?}, got {value}",
            column.name, column.unit
        ))
    };
    let value = value.unwrap_or(&Value::Null);
    if column.unit == Unit::Text {
        return match value {
            Value::Null => Ok(Field::Text(String::new())),
            Value::String(text) => Ok(Field::Text(text.clone())),
            Value::Number(number) => Ok(Field::Text(number.to_string())),
            Value::Bool(flag) => Ok(Field::Text(flag.to_string())),
            other => Err(mismatch(other)),
        };
    }
    let number = match value {
        Value::Null => 0.0,
        Value::Number(number) => number.as_f64().ok_or_else(|| mismatch(value))?,
        Value::String(text) => text.trim().parse::<f64>().map_err(|_| mismatch(value))?,
        other => return Err(mismatch(other)),
    };
    Ok(match column.unit {
        Unit::Count => Field::Count(number.round() as i64),
        Unit::Hectares => Field::Hectares(number),
        _ => Field::Number(number),
    })
}

/// Types raw rows by the declared columns. Missing numerics become 0.
pub fn normalize_rows(raw: &[Row], columns: &[Column]) -> Result<Vec<TypedRow>, CanopyError> {
    raw.iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| {
                    let cell = normalize_cell(column, row.get(&column.name))?;
                    Ok((column.name.clone(), cell))
                })
                .collect::<Result<TypedRow, CanopyError>>()
        })
        .collect()
}

pub struct Normalizer;

impl Normalizer {
    pub fn normalize(
        descriptor: &WidgetDescriptor,
        params: &ResolvedParams,
        plan: &ReadPlan,
        raw: &BTreeMap<String, Vec<Row>>,
    ) -> Result<AnalysisResult, CanopyError> {
        let mut responses = Responses::new();
        for name in plan.names() {
            let rows = raw.get(name).ok_or_else(|| {
                CanopyError::Normalization(format!("missing response for sub-request {name}"))
            })?;
            let columns = plan.columns(name).unwrap_or(&[]);
            responses.insert(name.to_string(), normalize_rows(rows, columns)?);
        }
        debug!(widget = %descriptor.id, responses = responses.len(), "shaping responses");

        let shaped = descriptor.contract.shape(params, &responses)?;
        let mut settings = params.bag.clone();
        settings.extend(shaped.settings);
        Ok(AnalysisResult {
            source: plan.source(),
            data: shaped.data,
            settings,
            options: shaped.options,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_numerics_become_zero() {
        let columns = vec![Column::count("alert__count"), Column::hectares("area__ha")];
        let typed = normalize_rows(&[row(json!({"alert__count": 7}))], &columns).unwrap();
        assert_eq!(typed[0]["alert__count"], Field::Count(7));
        assert_eq!(typed[0]["area__ha"], Field::Hectares(0.0));
    }

    #[test]
    fn numeric_strings_are_parsed() {
        let columns = vec![Column::hectares("area__ha")];
        let typed = normalize_rows(&[row(json!({"area__ha": "12.5"}))], &columns).unwrap();
        assert_eq!(typed[0]["area__ha"], Field::Hectares(12.5));
    }

    #[test]
    fn rejects_non_numeric_values() {
        let columns = vec![Column::count("alert__count")];
        let err = normalize_rows(&[row(json!({"alert__count": {"nested": 1}}))], &columns)
            .unwrap_err();
        assert_matches!(err, CanopyError::Normalization(_));
    }

    #[test]
    fn counts_round_to_integers() {
        let columns = vec![Column::count("count")];
        let typed = normalize_rows(&[row(json!({"count": 3.0}))], &columns).unwrap();
        assert_eq!(typed[0]["count"], Field::Count(3));
    }

    #[test]
    fn first_defaults_to_zero() {
        assert_eq!(first(&[], "value"), 0.0);
    }
}
