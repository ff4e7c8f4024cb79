use reqwest::blocking::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::domain::{AdminPath, LocationContext};
use crate::error::CanopyError;
use crate::otf::{DataEnvelope, build_client};
use crate::query::{Predicate, Projection, QuerySpec, Row, SortOrder, ValidQuery};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AggregateScope {
    Global,
    Admin(AdminPath),
    #[serde(rename = "wdpa")]
    ProtectedArea { wdpa_id: String },
    Geostore { id: String },
}

impl AggregateScope {
    pub fn for_location(location: &LocationContext) -> Self {
        match location {
            LocationContext::Global => AggregateScope::Global,
            LocationContext::Country(path) | LocationContext::Region(path) => {
                AggregateScope::Admin(path.clone())
            }
            LocationContext::ProtectedArea { wdpa_id, .. } => AggregateScope::ProtectedArea {
                wdpa_id: wdpa_id.clone(),
            },
            LocationContext::UserArea { geostore, .. } | LocationContext::UseArea { geostore, .. } => {
                AggregateScope::Geostore {
                    id: geostore.as_str().to_string(),
                }
            }
        }
    }

    pub fn table(&self, family: &str, kind: &str) -> String {
        match self {
            AggregateScope::Global => format!("gadm__{family}__iso_{kind}"),
            AggregateScope::Admin(path) => {
                let level = match (path.adm1, path.adm2) {
                    (Some(_), Some(_)) => "adm2",
                    (Some(_), None) => "adm1",
                    _ => "iso",
                };
                format!("gadm__{family}__{level}_{kind}")
            }
            AggregateScope::ProtectedArea { .. } => format!("wdpa_protected_areas__{family}__{kind}"),
            AggregateScope::Geostore { .. } => format!("geostore__{family}__{kind}"),
        }
    }

    pub fn predicates(&self) -> Vec<Predicate> {
        match self {
            AggregateScope::Global => Vec::new(),
            AggregateScope::Admin(path) => {
                let mut predicates = vec![Predicate::eq("iso", path.iso.as_str())];
                if let Some(adm1) = path.adm1 {
                    predicates.push(Predicate::eq("adm1", i64::from(adm1)));
                }
                if let Some(adm2) = path.adm2 {
                    predicates.push(Predicate::eq("adm2", i64::from(adm2)));
                }
                predicates
            }
            AggregateScope::ProtectedArea { wdpa_id } => {
                vec![Predicate::eq("wdpa_protected_area__id", wdpa_id.as_str())]
            }
            AggregateScope::Geostore { id } => vec![Predicate::eq("geostore__id", id.as_str())],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecomputedRequest {
    pub dataset: String,
    pub scope: AggregateScope,
    pub projection: Vec<Projection>,
    pub filters: Vec<Predicate>,
    pub group_by: Vec<String>,
    pub order_by: Vec<(String, SortOrder)>,
}

impl PrecomputedRequest {
    pub fn new(dataset: String, scope: AggregateScope) -> Self {
        Self {
            dataset,
            scope,
            projection: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.projection.push(projection);
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn group_by(mut self, field: &str) -> Self {
        self.group_by.push(field.to_string());
        self
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order_by.push((field.to_string(), order));
        self
    }

    pub fn to_query(&self) -> Result<ValidQuery, CanopyError> {
        let mut spec = QuerySpec::table(&self.dataset)
            .select_all(self.projection.iter().cloned())
            .filter_all(self.scope.predicates())
            .filter_all(self.filters.iter().cloned())
            .group_by(&self.group_by);
        for (field, order) in &self.order_by {
            spec = spec.order_by(field, *order);
        }
        spec.validate()
    }
}

pub trait PrecomputedClient: Send + Sync {
    fn fetch(&self, request: &PrecomputedRequest) -> Result<Vec<Row>, CanopyError>;
}

#[derive(Clone)]
pub struct PrecomputedHttpClient {
    client: Client,
    base_url: String,
}

impl PrecomputedHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, CanopyError> {
        let client = build_client(
            config.timeout,
            config.api_key.as_deref(),
            CanopyError::PrecomputedHttp,
        )?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }
}

impl PrecomputedClient for PrecomputedHttpClient {
    fn fetch(&self, request: &PrecomputedRequest) -> Result<Vec<Row>, CanopyError> {
        let query = request.to_query()?;
        let url = format!("{}/dataset/{}/latest/query", self.base_url, request.dataset);
        let sql = query.to_sql();
        debug!(url = %url, sql = %sql, "querying precomputed table");
        let response = self
            .client
            .get(&url)
            .query(&[("sql", sql.as_str())])
            .send()
            .map_err(|err| CanopyError::PrecomputedHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "precomputed request failed".to_string());
            return Err(CanopyError::PrecomputedStatus { status, message });
        }
        let envelope: DataEnvelope = response
            .json()
            .map_err(|err| CanopyError::Normalization(err.to_string()))?;
        envelope.into_rows()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn admin_scope_tables_and_predicates() {
        let location: LocationContext = "region:BRA.12.3".parse().unwrap();
        let scope = AggregateScope::for_location(&location);
        assert_eq!(scope.table("tcl", "change"), "gadm__tcl__adm2_change");
        assert_eq!(scope.predicates().len(), 3);
    }

    #[test]
    fn request_sql_includes_scope() {
        let location: LocationContext = "country:IDN".parse().unwrap();
        let scope = AggregateScope::for_location(&location);
        let request = PrecomputedRequest::new(scope.table("tcl", "change"), scope)
            .select(Projection::column("umd_tree_cover_loss__year"))
            .select(Projection::sum("umd_tree_cover_loss__ha", "area"))
            .filter(Predicate::eq("umd_tree_cover_density_2000__threshold", 30_i64))
            .group_by("umd_tree_cover_loss__year");
        assert_eq!(
            request.to_query().unwrap().to_sql(),
            "SELECT umd_tree_cover_loss__year, SUM(umd_tree_cover_loss__ha) AS area \
             FROM gadm__tcl__iso_change WHERE iso = 'IDN' AND \
             umd_tree_cover_density_2000__threshold = 30 GROUP BY umd_tree_cover_loss__year"
        );
    }

    #[test]
    fn client_errors_name_the_precomputed_boundary() {
        let config = ResolvedConfig {
            schema_version: 1,
            api_url: "https://api.example.org".to_string(),
            timeout: std::time::Duration::from_secs(5),
            api_key: Some("bad\nkey".to_string()),
            metadata: Default::default(),
            path: None,
        };
        let err = PrecomputedHttpClient::new(&config).err();
        assert_matches!(&err, Some(CanopyError::PrecomputedHttp(_)));
        let message = err.map(|err| err.to_string()).unwrap_or_default();
        assert!(!message.contains("query request failed"), "{message}");
    }
}
