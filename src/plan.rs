use serde::Serialize;

use crate::normalize::Column;
use crate::precomputed::PrecomputedRequest;
use crate::query::QuerySpec;
use crate::router::DataSource;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubRequest<T> {
    pub name: String,
    pub target: T,
    pub columns: Vec<Column>,
}

impl<T> SubRequest<T> {
    pub fn new(name: &str, target: T, columns: Vec<Column>) -> Self {
        Self {
            name: name.to_string(),
            target,
            columns,
        }
    }
}

/// All sub-requests of one read. A plan never mixes sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", content = "requests", rename_all = "camelCase")]
pub enum ReadPlan {
    Precomputed(Vec<SubRequest<PrecomputedRequest>>),
    OnTheFly(Vec<SubRequest<QuerySpec>>),
}

impl ReadPlan {
    pub fn source(&self) -> DataSource {
        match self {
            ReadPlan::Precomputed(_) => DataSource::Precomputed,
            ReadPlan::OnTheFly(_) => DataSource::OnTheFly,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ReadPlan::Precomputed(requests) => requests.len(),
            ReadPlan::OnTheFly(requests) => requests.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            ReadPlan::Precomputed(requests) => requests.iter().map(|r| r.name.as_str()).collect(),
            ReadPlan::OnTheFly(requests) => requests.iter().map(|r| r.name.as_str()).collect(),
        }
    }

    pub fn columns(&self, name: &str) -> Option<&[Column]> {
        match self {
            ReadPlan::Precomputed(requests) => requests
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.columns.as_slice()),
            ReadPlan::OnTheFly(requests) => requests
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.columns.as_slice()),
        }
    }
}
