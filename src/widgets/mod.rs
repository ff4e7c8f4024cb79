use std::collections::BTreeMap;
use std::fmt;

use crate::domain::LocationContext;
use crate::error::CanopyError;
use crate::normalize::{Column, Responses, Shaped};
use crate::params::{ParamValue, ResolvedParams, SettingKind, SettingSpec};
use crate::plan::{ReadPlan, SubRequest};
use crate::precomputed::{AggregateScope, PrecomputedRequest};
use crate::query::{GeometryBinding, GeometryOrigin, Literal, Predicate, Projection, QuerySpec};
use crate::registry::WidgetDescriptor;
use crate::router::DataSource;

mod integrated_alerts;
mod tree_cover;
mod tree_gain;
mod tree_loss_primary;

pub use integrated_alerts::IntegratedAlerts;
pub use tree_cover::TreeCover;
pub use tree_gain::TreeGain;
pub use tree_loss_primary::TreeLossPrimary;

pub trait WidgetContract: Send + Sync + fmt::Debug {
    fn plan(&self, params: &ResolvedParams, source: DataSource) -> Result<ReadPlan, CanopyError>;

    /// Pure: no I/O, widget-specific field names stay in here.
    fn shape(&self, params: &ResolvedParams, responses: &Responses) -> Result<Shaped, CanopyError>;

    /// Reads backing a bulk export. Defaults to the live reads.
    fn download_plan(
        &self,
        params: &ResolvedParams,
        source: DataSource,
    ) -> Result<ReadPlan, CanopyError> {
        self.plan(params, source)
    }
}

pub fn builtin() -> Vec<WidgetDescriptor> {
    vec![
        integrated_alerts::descriptor(),
        tree_loss_primary::descriptor(),
        tree_cover::descriptor(),
        tree_gain::descriptor(),
    ]
}

#[derive(Debug, Clone)]
pub(crate) struct Aggregate {
    family: String,
    kind: &'static str,
    otf_table: String,
    projection: Vec<Projection>,
    filters: Vec<Predicate>,
    group_by: Vec<String>,
    columns: Vec<Column>,
}

impl Aggregate {
    pub(crate) fn new(family: &str, kind: &'static str, otf_table: &str) -> Self {
        Self {
            family: family.to_string(),
            kind,
            otf_table: otf_table.to_string(),
            projection: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub(crate) fn select(mut self, projection: Projection, column: Column) -> Self {
        self.projection.push(projection);
        self.columns.push(column);
        self
    }

    pub(crate) fn group_by(mut self, field: &str, column: Column) -> Self {
        self.projection.push(Projection::column(field));
        self.group_by.push(field.to_string());
        self.columns.push(column);
        self
    }

    pub(crate) fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub(crate) fn filter_opt(self, predicate: Option<Predicate>) -> Self {
        match predicate {
            Some(predicate) => self.filter(predicate),
            None => self,
        }
    }
}

pub(crate) fn build_plan(
    params: &ResolvedParams,
    source: DataSource,
    reads: Vec<(&str, Aggregate)>,
) -> ReadPlan {
    match source {
        DataSource::Precomputed => {
            let scope = AggregateScope::for_location(&params.location);
            let requests = reads
                .into_iter()
                .map(|(name, read)| {
                    let mut request = PrecomputedRequest::new(
                        scope.table(&read.family, read.kind),
                        scope.clone(),
                    );
                    request.projection = read.projection;
                    request.filters = read.filters;
                    request.group_by = read.group_by;
                    SubRequest::new(name, request, read.columns)
                })
                .collect();
            ReadPlan::Precomputed(requests)
        }
        DataSource::OnTheFly => {
            let requests = reads
                .into_iter()
                .map(|(name, read)| {
                    let spec = QuerySpec::table(&read.otf_table)
                        .select_all(read.projection)
                        .filter_all(read.filters)
                        .group_by(&read.group_by);
                    SubRequest::new(name, scoped(&params.location, spec), read.columns)
                })
                .collect();
            ReadPlan::OnTheFly(requests)
        }
    }
}

pub(crate) fn scoped(location: &LocationContext, spec: QuerySpec) -> QuerySpec {
    let spec = spec.require_geometry(location.is_geometry_backed());
    match (location.geostore(), location.admin_path()) {
        (Some(geostore), _) => spec.bind_geometry(GeometryBinding {
            id: geostore.as_str().to_string(),
            origin: GeometryOrigin::Rw,
        }),
        (None, Some(path)) => spec.filter_all(AggregateScope::Admin(path.clone()).predicates()),
        (None, None) => spec,
    }
}

fn intersection_field(value: &str) -> String {
    match value {
        "primary_forest" => "is__umd_regional_primary_forest_2001".to_string(),
        "plantations" => "is__gfw_plantations".to_string(),
        "ifl" => "is__ifl_intact_forest_landscapes".to_string(),
        "mining" => "is__gfw_mining".to_string(),
        "wdpa" => "is__wdpa_protected_areas".to_string(),
        other => format!("is__{other}"),
    }
}

pub(crate) fn intersection(params: &ResolvedParams, key: &str) -> Option<Predicate> {
    params
        .text(key)
        .filter(|value| !value.is_empty())
        .map(|value| Predicate::eq(&intersection_field(value), Literal::Bool(true)))
}

pub(crate) fn required_int(params: &ResolvedParams, key: &str) -> Result<i64, CanopyError> {
    params.int(key).ok_or_else(|| CanopyError::InvalidSetting {
        key: key.to_string(),
        message: "no value resolved".to_string(),
    })
}

pub(crate) fn threshold_setting() -> SettingSpec {
    let options = [10_i64, 15, 20, 25, 30, 50, 75]
        .into_iter()
        .map(ParamValue::Int)
        .collect();
    SettingSpec::new(
        "threshold",
        SettingKind::Select {
            options: Some(options),
        },
    )
    .with_default(ParamValue::Int(30))
}

pub(crate) fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| key.to_string()).collect()
}

pub(crate) fn sentences(templates: &[(&str, &str)]) -> BTreeMap<String, String> {
    templates
        .iter()
        .map(|(scenario, template)| (scenario.to_string(), template.to_string()))
        .collect()
}
