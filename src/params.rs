use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::LocationContext;
use crate::error::CanopyError;
use crate::query::Literal;
use crate::registry::WidgetDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl ParamValue {
    pub fn text(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }

    pub fn parse_loose(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if let Ok(value) = raw.parse::<i64>() {
            return ParamValue::Int(value);
        }
        if let Ok(value) = raw.parse::<f64>() {
            return ParamValue::Float(value);
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return ParamValue::Date(date);
        }
        ParamValue::Text(raw.to_string())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(value) => Some(*value),
            ParamValue::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            ParamValue::Text(value) => value.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            ParamValue::Date(date) => Some(*date),
            ParamValue::Text(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(value) => Some(*value),
            ParamValue::Int(value) => Some(*value == 1),
            _ => None,
        }
    }

    pub fn to_literal(&self) -> Literal {
        match self {
            ParamValue::Bool(value) => Literal::Bool(*value),
            ParamValue::Int(value) => Literal::Int(*value),
            ParamValue::Float(value) => Literal::Float(*value),
            ParamValue::Date(value) => Literal::Date(*value),
            ParamValue::Text(value) => Literal::Text(value.clone()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(value) => write!(f, "{value}"),
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Float(value) => write!(f, "{value}"),
            ParamValue::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            ParamValue::Text(value) => write!(f, "{value}"),
        }
    }
}

pub type ParamBag = BTreeMap<String, ParamValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MetaKey {
    Fixed(String),
    BySetting {
        key: String,
        map: Vec<(String, String)>,
        fallback: String,
    },
}

impl MetaKey {
    fn dataset<'a>(&'a self, bag: &'a ParamBag) -> &'a str {
        match self {
            MetaKey::Fixed(dataset) => dataset,
            MetaKey::BySetting { key, map, fallback } => bag
                .get(key)
                .and_then(ParamValue::as_str)
                .and_then(|selected| {
                    map.iter()
                        .find(|(choice, _)| choice == selected)
                        .map(|(_, dataset)| dataset.as_str())
                })
                .unwrap_or(fallback.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DateBound {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SettingKind {
    /// `options: None` accepts any text value (options supplied by external metadata).
    Select { options: Option<Vec<ParamValue>> },
    Integer { min: i64, max: i64 },
    Date { bound: DateBound, meta: MetaKey },
    Flag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingSpec {
    pub key: String,
    pub kind: SettingKind,
    pub default: Option<ParamValue>,
}

impl SettingSpec {
    pub fn new(key: &str, kind: SettingKind) -> Self {
        Self {
            key: key.to_string(),
            kind,
            default: None,
        }
    }

    pub fn with_default(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn select(key: &str, options: &[&str]) -> Self {
        Self::new(
            key,
            SettingKind::Select {
                options: Some(options.iter().map(|value| ParamValue::text(value)).collect()),
            },
        )
    }

    pub fn open_select(key: &str) -> Self {
        Self::new(key, SettingKind::Select { options: None })
    }

    fn check(&self, value: &ParamValue) -> Result<ParamValue, CanopyError> {
        let invalid = |message: String| CanopyError::InvalidSetting {
            key: self.key.clone(),
            message,
        };
        match &self.kind {
            SettingKind::Select { options: None } => Ok(value.clone()),
            SettingKind::Select {
                options: Some(options),
            } => {
                let matched = options.iter().find(|option| {
                    *option == value
                        || matches!(
                            (option.as_i64(), value.as_i64()),
                            (Some(a), Some(b)) if a == b
                        )
                });
                matched
                    .cloned()
                    .ok_or_else(|| invalid(format!("{value} is not one of the options")))
            }
            SettingKind::Integer { min, max } => {
                let number = value
                    .as_i64()
                    .ok_or_else(|| invalid(format!("{value} is not an integer")))?;
                if number < *min || number > *max {
                    return Err(invalid(format!("{number} outside {min}..={max}")));
                }
                Ok(ParamValue::Int(number))
            }
            SettingKind::Date { .. } => value
                .as_date()
                .map(ParamValue::Date)
                .ok_or_else(|| invalid(format!("{value} is not a YYYY-MM-DD date"))),
            SettingKind::Flag => value
                .as_bool()
                .map(ParamValue::Bool)
                .ok_or_else(|| invalid(format!("{value} is not a flag"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetBounds {
    #[serde(default)]
    pub min_date: Option<NaiveDate>,
    #[serde(default)]
    pub max_date: Option<NaiveDate>,
    #[serde(default)]
    pub default_start: Option<NaiveDate>,
    #[serde(default)]
    pub default_end: Option<NaiveDate>,
}

impl DatasetBounds {
    fn clamp(&self, date: NaiveDate) -> NaiveDate {
        let date = self.min_date.map_or(date, |min| date.max(min));
        self.max_date.map_or(date, |max| date.min(max))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMetadata {
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetBounds>,
}

impl GlobalMetadata {
    pub fn bounds(&self, dataset: &str) -> Option<&DatasetBounds> {
        self.datasets.get(dataset)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageContext {
    pub map_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedParams {
    pub widget: String,
    pub location: LocationContext,
    pub bag: ParamBag,
    pub ready: bool,
    pub page: PageContext,
    /// Dataset bounds each date setting was clamped to, keyed by setting.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub bounds: BTreeMap<String, DatasetBounds>,
}

impl ResolvedParams {
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.bag.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.bag.get(key).and_then(ParamValue::as_str)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.bag.get(key).and_then(ParamValue::as_i64)
    }

    pub fn date(&self, key: &str) -> Option<NaiveDate> {
        self.bag.get(key).and_then(ParamValue::as_date)
    }

    pub fn bounds(&self, key: &str) -> Option<&DatasetBounds> {
        self.bounds.get(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.bag
            .get(key)
            .and_then(ParamValue::as_bool)
            .unwrap_or(false)
    }

    pub fn with(&self, overrides: &[(&str, Option<ParamValue>)]) -> Self {
        let mut next = self.clone();
        for (key, value) in overrides {
            match value {
                Some(value) => {
                    next.bag.insert(key.to_string(), value.clone());
                }
                None => {
                    next.bag.remove(*key);
                }
            }
        }
        next
    }

    pub fn fingerprint(&self) -> String {
        let payload = serde_json::to_vec(&(&self.widget, &self.location, &self.bag, &self.page))
            .unwrap_or_default();
        blake3::hash(&payload).to_hex().to_string()
    }
}

pub struct Resolver;

impl Resolver {
    pub fn resolve(
        descriptor: &WidgetDescriptor,
        location: &LocationContext,
        user: &ParamBag,
        meta: &GlobalMetadata,
        page: PageContext,
    ) -> ResolvedParams {
        for key in user.keys() {
            if descriptor.setting(key).is_none() {
                debug!(widget = %descriptor.id, key = %key, "ignoring unknown setting");
            }
        }

        let mut bag = ParamBag::new();
        let mut date_bounds = BTreeMap::new();
        // Dates resolve last: their bounds may depend on another setting.
        let (dates, others): (Vec<_>, Vec<_>) = descriptor
            .settings
            .iter()
            .partition(|spec| matches!(spec.kind, SettingKind::Date { .. }));

        for spec in others {
            if let Some(value) = Self::user_value(descriptor, spec, user).or(spec.default.clone())
            {
                bag.insert(spec.key.clone(), value);
            }
        }

        for spec in dates {
            let SettingKind::Date { bound, meta: key } = &spec.kind else {
                continue;
            };
            let bounds = meta.bounds(key.dataset(&bag)).cloned().unwrap_or_default();
            let derived = match bound {
                DateBound::Start => bounds.default_start.or(bounds.min_date),
                DateBound::End => bounds.default_end.or(bounds.max_date),
            };
            let value = Self::user_value(descriptor, spec, user)
                .or(spec.default.clone())
                .and_then(|value| value.as_date())
                .or(derived)
                .map(|date| ParamValue::Date(bounds.clamp(date)));
            if let Some(value) = value {
                bag.insert(spec.key.clone(), value);
            }
            date_bounds.insert(spec.key.clone(), bounds);
        }

        let ready = descriptor
            .pending_keys
            .iter()
            .all(|key| bag.contains_key(key));

        ResolvedParams {
            widget: descriptor.id.clone(),
            location: location.clone(),
            bag,
            ready,
            page,
            bounds: date_bounds,
        }
    }

    fn user_value(
        descriptor: &WidgetDescriptor,
        spec: &SettingSpec,
        user: &ParamBag,
    ) -> Option<ParamValue> {
        let raw = user.get(&spec.key)?;
        match spec.check(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(widget = %descriptor.id, error = %err, "dropping user setting");
                None
            }
        }
    }
}
