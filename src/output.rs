use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::domain::{AdminLevel, LocationType};
use crate::download::DownloadDescriptor;
use crate::engine::{Dashboard, Refresh};
use crate::error::CanopyError;
use crate::fetch_state::FetchState;
use crate::normalize::AnalysisResult;
use crate::otf::QueryExecutor;
use crate::params::ResolvedParams;
use crate::plan::ReadPlan;
use crate::precomputed::PrecomputedClient;
use crate::query::GeometryBinding;
use crate::registry::WidgetDescriptor;
use crate::router::DataSource;

#[derive(Debug, Clone, Serialize)]
pub struct WidgetSummary {
    pub id: String,
    pub title: String,
    pub location_types: Vec<LocationType>,
    pub admin_levels: Vec<AdminLevel>,
    pub refetch_keys: Vec<String>,
    pub pending_keys: Vec<String>,
}

impl From<&WidgetDescriptor> for WidgetSummary {
    fn from(descriptor: &WidgetDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            title: descriptor.title.clone(),
            location_types: descriptor.location_types.clone(),
            admin_levels: descriptor.admin_levels.clone(),
            refetch_keys: descriptor.refetch_keys.clone(),
            pending_keys: descriptor.pending_keys.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedQuery {
    pub name: String,
    pub table: String,
    pub sql: String,
    pub geometry: Option<GeometryBinding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub widget: String,
    pub location: String,
    pub source: DataSource,
    pub ready: bool,
    pub queries: Vec<PlannedQuery>,
}

impl PlanReport {
    pub fn new(params: &ResolvedParams, plan: &ReadPlan) -> Result<Self, CanopyError> {
        let queries = match plan {
            ReadPlan::Precomputed(requests) => requests
                .iter()
                .map(|request| {
                    let query = request.target.to_query()?;
                    Ok(PlannedQuery {
                        name: request.name.clone(),
                        table: query.table().to_string(),
                        sql: query.to_sql(),
                        geometry: None,
                    })
                })
                .collect::<Result<Vec<_>, CanopyError>>()?,
            ReadPlan::OnTheFly(requests) => requests
                .iter()
                .map(|request| {
                    let query = request.target.clone().validate()?;
                    Ok(PlannedQuery {
                        name: request.name.clone(),
                        table: query.table().to_string(),
                        sql: query.to_sql(),
                        geometry: query.geometry().cloned(),
                    })
                })
                .collect::<Result<Vec<_>, CanopyError>>()?,
        };
        Ok(Self {
            widget: params.widget.clone(),
            location: params.location.to_string(),
            source: plan.source(),
            ready: params.ready,
            queries,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WidgetOutcome {
    pub refresh: Refresh,
    pub state: Option<FetchState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub location: String,
    pub epoch: u64,
    pub widgets: BTreeMap<String, WidgetOutcome>,
}

impl DashboardReport {
    pub fn new<Q: QueryExecutor, P: PrecomputedClient>(
        dashboard: &Dashboard<'_, Q, P>,
        outcomes: &BTreeMap<String, Refresh>,
    ) -> Self {
        let widgets = outcomes
            .iter()
            .map(|(widget, refresh)| {
                let state = dashboard.state(widget).cloned();
                (
                    widget.clone(),
                    WidgetOutcome {
                        refresh: *refresh,
                        state,
                    },
                )
            })
            .collect();
        Self {
            location: dashboard.location().to_string(),
            epoch: dashboard.epoch(),
            widgets,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_widgets(widgets: &[WidgetSummary]) -> io::Result<()> {
        Self::print_json(widgets)
    }

    pub fn print_result(result: &AnalysisResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_plan(report: &PlanReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_downloads(downloads: &[DownloadDescriptor]) -> io::Result<()> {
        Self::print_json(downloads)
    }

    pub fn print_dashboard(report: &DashboardReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
