use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::LocationContext;
use crate::download::{self, DownloadDescriptor};
use crate::error::{CanopyError, ErrorClass};
use crate::fetch_state::{Applied, FetchState, FetchStatus, FetchTicket};
use crate::invalidate::{changed_keys, is_stale};
use crate::normalize::{AnalysisResult, Normalizer};
use crate::otf::QueryExecutor;
use crate::params::{GlobalMetadata, PageContext, ParamBag, ResolvedParams, Resolver};
use crate::plan::ReadPlan;
use crate::precomputed::PrecomputedClient;
use crate::query::Row;
use crate::registry::{Registry, WidgetDescriptor};
use crate::router::{DataSource, route};

pub struct Engine<Q, P> {
    registry: Registry,
    executor: Q,
    precomputed: P,
    metadata: GlobalMetadata,
    api_url: String,
}

impl<Q: QueryExecutor, P: PrecomputedClient> Engine<Q, P> {
    pub fn new(registry: Registry, executor: Q, precomputed: P) -> Self {
        Self {
            registry,
            executor,
            precomputed,
            metadata: GlobalMetadata::default(),
            api_url: crate::config::DEFAULT_API_URL.to_string(),
        }
    }

    pub fn with_metadata(mut self, metadata: GlobalMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metadata(&self) -> &GlobalMetadata {
        &self.metadata
    }

    pub fn resolve(
        &self,
        widget: &str,
        location: &LocationContext,
        user: &ParamBag,
        page: PageContext,
    ) -> Result<ResolvedParams, CanopyError> {
        let descriptor = self.registry.get(widget)?;
        descriptor.supports(location)?;
        Ok(Resolver::resolve(
            descriptor,
            location,
            user,
            &self.metadata,
            page,
        ))
    }

    pub fn plan(&self, params: &ResolvedParams) -> Result<ReadPlan, CanopyError> {
        let descriptor = self.registry.get(&params.widget)?;
        if !params.ready {
            return Err(pending(descriptor, params));
        }
        let source = route(descriptor, &params.location);
        let plan = descriptor.contract.plan(params, source)?;
        if plan.source() != source {
            return Err(CanopyError::InvalidDescriptor {
                widget: descriptor.id.clone(),
                message: format!("plan uses {} but route chose {source}", plan.source()),
            });
        }
        debug!(
            widget = %descriptor.id,
            location = %params.location,
            source = %source,
            requests = plan.len(),
            "planned read"
        );
        Ok(plan)
    }

    pub fn get_data(&self, params: &ResolvedParams) -> Result<AnalysisResult, CanopyError> {
        let descriptor = self.registry.get(&params.widget)?;
        let plan = self.plan(params)?;
        info!(widget = %descriptor.id, source = %plan.source(), "fetching widget data");
        let raw = self.fetch_all(&plan)?;
        let result = Normalizer::normalize(descriptor, params, &plan, &raw)?;
        info!(widget = %descriptor.id, series = result.data.series.len(), "widget data loaded");
        Ok(result)
    }

    pub fn get_data_url(
        &self,
        params: &ResolvedParams,
    ) -> Result<Vec<DownloadDescriptor>, CanopyError> {
        let descriptor = self.registry.get(&params.widget)?;
        if !params.ready {
            return Err(pending(descriptor, params));
        }
        download::build(descriptor, params, &self.api_url)
    }

    /// Fans sub-requests out in parallel; any failure fails the read.
    fn fetch_all(&self, plan: &ReadPlan) -> Result<BTreeMap<String, Vec<Row>>, CanopyError> {
        match plan {
            ReadPlan::Precomputed(requests) => requests
                .par_iter()
                .map(|request| {
                    let rows = self.precomputed.fetch(&request.target)?;
                    Ok((request.name.clone(), rows))
                })
                .collect(),
            ReadPlan::OnTheFly(requests) => requests
                .par_iter()
                .map(|request| {
                    let rows = request.target.clone().execute(&self.executor)?;
                    Ok((request.name.clone(), rows))
                })
                .collect(),
        }
    }
}

fn pending(descriptor: &WidgetDescriptor, params: &ResolvedParams) -> CanopyError {
    let key = descriptor
        .pending_keys
        .iter()
        .find(|key| params.get(key).is_none())
        .cloned()
        .unwrap_or_default();
    CanopyError::PendingSetting {
        widget: descriptor.id.clone(),
        key,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    NotReady,
    Unchanged,
    Issued {
        ticket: FetchTicket,
        params: ResolvedParams,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Refresh {
    NotReady,
    Unchanged,
    Loaded,
    Failed,
    Discarded,
}

impl From<Applied> for Refresh {
    fn from(applied: Applied) -> Self {
        match applied {
            Applied::Loaded => Refresh::Loaded,
            Applied::Failed => Refresh::Failed,
            Applied::Discarded => Refresh::Discarded,
        }
    }
}

/// Per-location widget states. Replacing the location drops every state,
/// and outcomes issued before that are discarded.
pub struct Dashboard<'e, Q, P> {
    engine: &'e Engine<Q, P>,
    location: LocationContext,
    page: PageContext,
    epoch: u64,
    settings: BTreeMap<String, ParamBag>,
    states: BTreeMap<String, FetchState>,
}

impl<'e, Q: QueryExecutor, P: PrecomputedClient> Dashboard<'e, Q, P> {
    pub fn new(engine: &'e Engine<Q, P>, location: LocationContext, page: PageContext) -> Self {
        Self {
            engine,
            location,
            page,
            epoch: 0,
            settings: BTreeMap::new(),
            states: BTreeMap::new(),
        }
    }

    pub fn location(&self) -> &LocationContext {
        &self.location
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self, widget: &str) -> Option<&FetchState> {
        self.states.get(widget)
    }

    pub fn states(&self) -> impl Iterator<Item = (&str, &FetchState)> {
        self.states
            .iter()
            .map(|(widget, state)| (widget.as_str(), state))
    }

    pub fn set_location(&mut self, location: LocationContext) {
        info!(from = %self.location, to = %location, "location changed");
        self.location = location;
        self.epoch += 1;
        self.states.clear();
    }

    pub fn set_settings(&mut self, widget: &str, settings: ParamBag) {
        self.settings.insert(widget.to_string(), settings);
    }

    pub fn request(&mut self, widget: &str) -> Result<Update, CanopyError> {
        self.issue(widget, false)
    }

    pub fn retry(&mut self, widget: &str) -> Result<Update, CanopyError> {
        self.issue(widget, true)
    }

    fn issue(&mut self, widget: &str, force: bool) -> Result<Update, CanopyError> {
        let user = self.settings.get(widget).cloned().unwrap_or_default();
        let params = self
            .engine
            .resolve(widget, &self.location, &user, self.page)?;
        if !params.ready {
            debug!(widget, "waiting on pending settings");
            return Ok(Update::NotReady);
        }
        let descriptor = self.engine.registry().get(widget)?;
        let state = self.states.entry(widget.to_string()).or_default();
        if !force && state.status != FetchStatus::Idle {
            if !is_stale(state.params.as_ref(), &params, &descriptor.refetch_keys) {
                return Ok(Update::Unchanged);
            }
            if let Some(prev) = &state.params {
                debug!(
                    widget,
                    changed = ?changed_keys(prev, &params, &descriptor.refetch_keys),
                    "refetch keys changed"
                );
            }
        }
        let generation = state.begin(params.clone());
        info!(widget, generation, epoch = self.epoch, "issuing fetch");
        Ok(Update::Issued {
            ticket: FetchTicket {
                widget: widget.to_string(),
                generation,
                epoch: self.epoch,
            },
            params,
        })
    }

    /// Applies an outcome if its ticket is still the latest for this location.
    pub fn apply(
        &mut self,
        ticket: &FetchTicket,
        outcome: Result<AnalysisResult, CanopyError>,
    ) -> Applied {
        if ticket.epoch != self.epoch {
            debug!(widget = %ticket.widget, epoch = ticket.epoch, "discarding outcome for old location");
            return Applied::Discarded;
        }
        let source = match self.engine.registry().get(&ticket.widget) {
            Ok(descriptor) => route(descriptor, &self.location),
            Err(_) => DataSource::OnTheFly,
        };
        match self.states.get_mut(&ticket.widget) {
            Some(state) => state.apply(ticket.generation, outcome, source),
            None => Applied::Discarded,
        }
    }

    /// Runs every eligible widget to completion, fetching in parallel.
    /// A configuration error is recorded on its widget and collected, and
    /// the remaining widgets still run.
    pub fn refresh(&mut self) -> Refreshed {
        let widgets: Vec<String> = self
            .engine
            .registry()
            .eligible(&self.location)
            .map(|descriptor| descriptor.id.clone())
            .collect();

        let mut refreshed = Refreshed::default();
        let mut issued = Vec::new();
        for widget in widgets {
            match self.request(&widget) {
                Ok(Update::NotReady) => {
                    refreshed.outcomes.insert(widget, Refresh::NotReady);
                }
                Ok(Update::Unchanged) => {
                    refreshed.outcomes.insert(widget, Refresh::Unchanged);
                }
                Ok(Update::Issued { ticket, params }) => issued.push((ticket, params)),
                Err(err) => {
                    warn!(widget = %widget, error = %err, "widget could not be requested");
                    refreshed.outcomes.insert(widget.clone(), Refresh::Failed);
                    refreshed.errors.push((widget, err));
                }
            }
        }

        let engine = self.engine;
        let fetched: Vec<_> = issued
            .into_par_iter()
            .map(|(ticket, params)| {
                let outcome = engine.get_data(&params);
                (ticket, outcome)
            })
            .collect();

        for (ticket, outcome) in fetched {
            let refresh = match outcome {
                Err(err) if err.class() == ErrorClass::Configuration => {
                    let refresh = self
                        .states
                        .get_mut(&ticket.widget)
                        .map_or(Refresh::Discarded, |state| {
                            state.fail(ticket.generation, &err).into()
                        });
                    refreshed.errors.push((ticket.widget.clone(), err));
                    refresh
                }
                outcome => self.apply(&ticket, outcome).into(),
            };
            refreshed.outcomes.insert(ticket.widget, refresh);
        }
        refreshed.errors.sort_by(|a, b| a.0.cmp(&b.0));
        refreshed
    }
}

#[derive(Debug, Default)]
pub struct Refreshed {
    pub outcomes: BTreeMap<String, Refresh>,
    /// Sorted by widget.
    pub errors: Vec<(String, CanopyError)>,
}

impl Refreshed {
    pub fn first_error(self) -> Option<CanopyError> {
        self.errors.into_iter().next().map(|(_, err)| err)
    }
}
