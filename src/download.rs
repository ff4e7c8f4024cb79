use serde::Serialize;
use tracing::debug;

use crate::error::CanopyError;
use crate::params::ResolvedParams;
use crate::plan::ReadPlan;
use crate::query::GeometryBinding;
use crate::registry::WidgetDescriptor;
use crate::router::{DataSource, route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadDescriptor {
    pub name: String,
    pub source: DataSource,
    pub endpoint: String,
    pub table: String,
    pub sql: String,
    pub geometry: Option<GeometryBinding>,
    pub format: DownloadFormat,
}

pub fn download_url(api_url: &str, table: &str) -> String {
    format!(
        "{}/dataset/{table}/latest/download/csv",
        api_url.trim_end_matches('/')
    )
}

/// Builds export descriptors for the source the live read would use.
/// Never executes anything; exports are unpaginated.
pub fn build(
    descriptor: &WidgetDescriptor,
    params: &ResolvedParams,
    api_url: &str,
) -> Result<Vec<DownloadDescriptor>, CanopyError> {
    let source = route(descriptor, &params.location);
    let plan = descriptor.contract.download_plan(params, source)?;
    if plan.source() != source {
        return Err(CanopyError::InvalidDescriptor {
            widget: descriptor.id.clone(),
            message: format!("download plan uses {} but route chose {source}", plan.source()),
        });
    }
    debug!(widget = %descriptor.id, source = %source, requests = plan.len(), "building downloads");

    match plan {
        ReadPlan::Precomputed(requests) => requests
            .into_iter()
            .map(|request| {
                let query = request.target.to_query()?;
                Ok(DownloadDescriptor {
                    endpoint: download_url(api_url, query.table()),
                    table: query.table().to_string(),
                    sql: query.to_sql(),
                    name: request.name,
                    source,
                    geometry: None,
                    format: DownloadFormat::Csv,
                })
            })
            .collect(),
        ReadPlan::OnTheFly(requests) => requests
            .into_iter()
            .map(|request| {
                let query = request.target.unpaginated().validate()?;
                Ok(DownloadDescriptor {
                    endpoint: download_url(api_url, query.table()),
                    table: query.table().to_string(),
                    sql: query.to_sql(),
                    geometry: query.geometry().cloned(),
                    name: request.name,
                    source,
                    format: DownloadFormat::Csv,
                })
            })
            .collect(),
    }
}
