#![allow(dead_code)]

use std::sync::Mutex;

use serde_json::Value;

use canopy_analytics::engine::Engine;
use canopy_analytics::error::CanopyError;
use canopy_analytics::otf::QueryExecutor;
use canopy_analytics::precomputed::{PrecomputedClient, PrecomputedRequest};
use canopy_analytics::query::{Row, ValidQuery};
use canopy_analytics::registry::Registry;

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

/// Canned rows picked by the first needle found in the statement.
#[derive(Default)]
pub struct Canned {
    responses: Vec<(String, Vec<Row>)>,
    failure: Option<fn() -> CanopyError>,
    calls: Mutex<Vec<String>>,
}

impl Canned {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, needle: &str, rows: Vec<Row>) -> Self {
        self.responses.push((needle.to_string(), rows));
        self
    }

    pub fn failing(mut self, failure: fn() -> CanopyError) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, sql: String) -> Result<Vec<Row>, CanopyError> {
        self.calls.lock().unwrap().push(sql.clone());
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

pub struct MockExecutor(pub Canned);

impl QueryExecutor for MockExecutor {
    fn execute(&self, query: &ValidQuery) -> Result<Vec<Row>, CanopyError> {
        self.0.answer(query.to_sql())
    }
}

pub struct MockPrecomputed(pub Canned);

impl PrecomputedClient for MockPrecomputed {
    fn fetch(&self, request: &PrecomputedRequest) -> Result<Vec<Row>, CanopyError> {
        let query = request.to_query()?;
        self.0.answer(query.to_sql())
    }
}

pub fn engine(executor: Canned, precomputed: Canned) -> Engine<MockExecutor, MockPrecomputed> {
    Engine::new(
        Registry::builtin().unwrap(),
        MockExecutor(executor),
        MockPrecomputed(precomputed),
    )
}
