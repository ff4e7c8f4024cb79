use serde::Serialize;
use tracing::{debug, error};

use crate::error::{CanopyError, ErrorClass};
use crate::normalize::AnalysisResult;
use crate::params::ResolvedParams;
use crate::router::DataSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    #[default]
    Idle,
    Pending,
    Loaded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchError {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&CanopyError> for FetchError {
    fn from(err: &CanopyError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

/// Identifies one issued fetch. Outcomes carrying an old generation or
/// epoch are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FetchTicket {
    pub widget: String,
    pub generation: u64,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Applied {
    Loaded,
    Failed,
    Discarded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchState {
    pub fingerprint: Option<String>,
    pub params: Option<ResolvedParams>,
    pub status: FetchStatus,
    pub result: Option<AnalysisResult>,
    pub error: Option<FetchError>,
    pub generation: u64,
}

impl FetchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, params: ResolvedParams) -> u64 {
        self.generation += 1;
        self.fingerprint = Some(params.fingerprint());
        self.params = Some(params);
        self.status = FetchStatus::Pending;
        self.error = None;
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.status == FetchStatus::Pending && self.generation == generation
    }

    fn superseded(&self, generation: u64) -> bool {
        if self.is_current(generation) {
            return false;
        }
        debug!(
            generation,
            current = self.generation,
            "discarding superseded outcome"
        );
        true
    }

    pub fn apply(
        &mut self,
        generation: u64,
        outcome: Result<AnalysisResult, CanopyError>,
        source: DataSource,
    ) -> Applied {
        match outcome {
            Ok(_) if self.superseded(generation) => Applied::Discarded,
            Ok(result) => {
                self.status = FetchStatus::Loaded;
                self.result = Some(result);
                self.error = None;
                Applied::Loaded
            }
            Err(err) => {
                let applied = self.fail(generation, &err);
                if applied == Applied::Failed && err.class() == ErrorClass::Normalization {
                    error!(error = %err, "response shape mismatch");
                    let settings = self
                        .params
                        .as_ref()
                        .map(|params| params.bag.clone())
                        .unwrap_or_default();
                    self.result = Some(AnalysisResult::empty(source, settings));
                }
                applied
            }
        }
    }

    /// Records a failure. The previous result is dropped.
    pub fn fail(&mut self, generation: u64, err: &CanopyError) -> Applied {
        if self.superseded(generation) {
            return Applied::Discarded;
        }
        self.status = FetchStatus::Error;
        self.result = None;
        self.error = Some(FetchError::from(err));
        Applied::Failed
    }
}
