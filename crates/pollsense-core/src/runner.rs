//! Fetch cycle and the per-target polling task.
//!
//! A [`FetchCycle`] performs one tick at a time:
//!
//! ```text
//! Idle ──tick()──▶ Fetching ──response──▶ Success ──▶ Idle
//!                      └──────error─────▶ Failed  ──▶ Idle
//! ```
//!
//! On success every sensor is extracted, templated, passed through its
//! retention policy and classified in one synchronous pass. On failure every
//! sensor goes straight to its retention policy. A [`Poller`] drives a cycle
//! on a fixed interval and commits each outcome to a [`SnapshotStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::classify::classify;
use crate::config::{FetchConfig, FetchTarget, SensorRule};
use crate::extract::{CompiledLocator, ResponseView};
use crate::response::{PollHealth, RawResponse};
use crate::retention::ValueRetention;
use crate::state::{PollEvent, SensorState, TargetSnapshot};
use crate::template::{AttributeTemplate, TemplateVariables, ValueTemplate};
use crate::transport::{HttpTransport, TransportError};

/// Where a cycle is in its tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Success,
    Failed,
}

struct CompiledAttribute {
    key: String,
    locator: CompiledLocator,
    template: ValueTemplate,
}

struct CompiledSensor {
    name: String,
    unit: Option<String>,
    locator: CompiledLocator,
    value_template: ValueTemplate,
    attr_template: AttributeTemplate,
    attributes: Vec<CompiledAttribute>,
    retention: ValueRetention,
}

impl CompiledSensor {
    fn compile(rule: &SensorRule) -> Self {
        Self {
            name: rule.name.clone(),
            unit: rule.unit.clone(),
            locator: CompiledLocator::compile(&rule.locator),
            value_template: ValueTemplate::compile(rule.value_template.as_deref()),
            attr_template: AttributeTemplate::compile(rule.attr_template.as_ref()),
            attributes: rule
                .attributes
                .iter()
                .map(|attribute| CompiledAttribute {
                    key: attribute.key.clone(),
                    locator: CompiledLocator::compile(&attribute.locator),
                    template: ValueTemplate::compile(attribute.value_template.as_deref()),
                })
                .collect(),
            retention: ValueRetention::new(rule.keep_last_value, rule.keep_last_attributes),
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(e) = self.locator.error() {
            problems.push(format!("sensor '{}': {}", self.name, e));
        }
        if let Some(e) = self.value_template.error() {
            problems.push(format!("sensor '{}' value_template: {}", self.name, e));
        }
        for e in self.attr_template.errors() {
            problems.push(format!("sensor '{}' attr_template: {}", self.name, e));
        }
        for attribute in &self.attributes {
            if let Some(e) = attribute.locator.error() {
                problems.push(format!(
                    "sensor '{}' attribute '{}': {}",
                    self.name, attribute.key, e
                ));
            }
            if let Some(e) = attribute.template.error() {
                problems.push(format!(
                    "sensor '{}' attribute '{}' value_template: {}",
                    self.name, attribute.key, e
                ));
            }
        }
        problems
    }

    fn process(
        &mut self,
        target: &str,
        view: &ResponseView<'_>,
        base: &TemplateVariables,
        at: DateTime<Utc>,
    ) -> SensorState {
        let extraction = self.locator.extract(view);
        let variables = base.with_value(extraction.value.clone());

        let value = match self.value_template.render(&variables) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    target_name = %target,
                    sensor = %self.name,
                    "value template failed, using extracted value: {}",
                    e
                );
                extraction.value.clone()
            }
        };

        let mut attributes = extraction.diagnostics;
        for attribute in &self.attributes {
            let found = attribute.locator.extract(view);
            let rendered = attribute
                .template
                .render(&base.with_value(found.value.clone()))
                .unwrap_or_else(|e| {
                    warn!(
                        target_name = %target,
                        sensor = %self.name,
                        attribute = %attribute.key,
                        "attribute template failed, using extracted value: {}",
                        e
                    );
                    found.value
                });
            attributes.insert(attribute.key.clone(), rendered);
        }
        if !self.attr_template.is_empty() {
            match self.attr_template.render(&variables) {
                Ok(rendered) => attributes.extend(rendered),
                Err(e) => warn!(
                    target_name = %target,
                    sensor = %self.name,
                    "attributes template failed, dropping its attributes: {}",
                    e
                ),
            }
        }

        let retained = self.retention.on_rendered(value, &attributes);
        if retained.replayed {
            debug!(target_name = %target, sensor = %self.name, "replaying last good value");
        }
        self.state(
            retained.value,
            retained.attributes.unwrap_or(attributes),
            retained.replayed,
            at,
        )
    }

    fn process_failure(&mut self, at: DateTime<Utc>) -> SensorState {
        let retained = self.retention.on_failure();
        self.state(
            retained.value,
            retained.attributes.unwrap_or_default(),
            retained.replayed,
            at,
        )
    }

    fn state(
        &self,
        value: Value,
        attributes: Map<String, Value>,
        replayed: bool,
        at: DateTime<Utc>,
    ) -> SensorState {
        SensorState {
            state_class: classify(&value, self.unit.as_deref()),
            value,
            attributes,
            unit: self.unit.clone(),
            last_updated: at,
            replayed,
        }
    }
}

/// Result of one tick, ready to be committed.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub target: String,
    pub sequence: u64,
    /// `Success` or `Failed`
    pub phase: CyclePhase,
    pub sensors: BTreeMap<String, SensorState>,
    pub health: PollHealth,
    pub error: Option<TransportError>,
}

/// One target's fetch configuration, compiled rules and per-rule state.
pub struct FetchCycle {
    config: FetchConfig,
    sensors: Vec<CompiledSensor>,
    health: PollHealth,
    phase: CyclePhase,
    sequence: u64,
    transport: Arc<dyn HttpTransport>,
}

impl FetchCycle {
    /// Compile a target's rules. Broken locators and templates are logged
    /// here and then behave as extraction/render failures on every tick.
    pub fn new(target: FetchTarget, transport: Arc<dyn HttpTransport>) -> Self {
        let sensors: Vec<CompiledSensor> =
            target.sensors.iter().map(CompiledSensor::compile).collect();
        for sensor in &sensors {
            for problem in sensor.problems() {
                warn!(target_name = %target.config.name, "{}", problem);
            }
        }

        Self {
            config: target.config,
            sensors,
            health: PollHealth::default(),
            phase: CyclePhase::Idle,
            sequence: 0,
            transport,
        }
    }

    /// Continue numbering ticks after `sequence`.
    pub fn resume_from(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn health(&self) -> &PollHealth {
        &self.health
    }

    /// Locator and template problems found while compiling.
    pub fn problems(&self) -> Vec<String> {
        self.sensors.iter().flat_map(CompiledSensor::problems).collect()
    }

    /// Issue one request and run every sensor over the result.
    pub async fn tick(&mut self) -> TickOutcome {
        self.sequence += 1;
        self.phase = CyclePhase::Fetching;
        trace!(target_name = %self.config.name, sequence = self.sequence, "fetching");

        let transport = self.transport.clone();
        let fetch = transport.fetch(&self.config);
        let result = match tokio::time::timeout(self.config.timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.config.timeout)),
        };

        let now = Utc::now();
        let (phase, sensors, error) = match result {
            Ok(response) => {
                let response = response.decoded_for(self.config.mode);
                self.health.record_response(&response, now);
                (CyclePhase::Success, self.apply(&response, now), None)
            }
            Err(e) => {
                warn!(target_name = %self.config.name, "fetch failed: {}", e);
                self.health.record_failure(e.to_string(), now);
                (CyclePhase::Failed, self.apply_failure(now), Some(e))
            }
        };

        self.phase = phase;
        let outcome = TickOutcome {
            target: self.config.name.clone(),
            sequence: self.sequence,
            phase,
            sensors,
            health: self.health.clone(),
            error,
        };
        self.phase = CyclePhase::Idle;
        outcome
    }

    /// Run every sensor over a response.
    pub fn apply(
        &mut self,
        response: &RawResponse,
        at: DateTime<Utc>,
    ) -> BTreeMap<String, SensorState> {
        let view = ResponseView::new(response);
        let base = TemplateVariables {
            value: Arc::new(Value::Null),
            text: Some(Arc::from(response.text.as_str())),
            json: response.json.clone().map(Arc::new),
            status: Some(response.status),
        };

        let target = self.config.name.as_str();
        self.sensors
            .iter_mut()
            .map(|sensor| {
                let state = sensor.process(target, &view, &base, at);
                (sensor.name.clone(), state)
            })
            .collect()
    }

    /// Run every sensor through the failure path.
    pub fn apply_failure(&mut self, at: DateTime<Utc>) -> BTreeMap<String, SensorState> {
        self.sensors
            .iter_mut()
            .map(|sensor| (sensor.name.clone(), sensor.process_failure(at)))
            .collect()
    }
}

/// Shared latest snapshot of one target.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    inner: Arc<RwLock<TargetSnapshot>>,
}

impl SnapshotStore {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TargetSnapshot::empty(target))),
        }
    }

    pub async fn snapshot(&self) -> TargetSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn sequence(&self) -> u64 {
        self.inner.read().await.sequence
    }

    /// Commit every sensor of a tick at once.
    ///
    /// Returns the new snapshot, or `None` when the outcome is older than
    /// what is already committed.
    pub async fn commit(&self, outcome: TickOutcome) -> Option<TargetSnapshot> {
        let mut snapshot = self.inner.write().await;
        if outcome.sequence <= snapshot.sequence {
            return None;
        }
        snapshot.target = outcome.target;
        snapshot.sequence = outcome.sequence;
        snapshot.sensors = outcome.sensors;
        snapshot.health = outcome.health;
        Some(snapshot.clone())
    }
}

/// Commit an outcome and announce it.
pub async fn publish(
    store: &SnapshotStore,
    events: &broadcast::Sender<PollEvent>,
    outcome: TickOutcome,
) {
    let target = outcome.target.clone();
    let sequence = outcome.sequence;
    let error = outcome.error.as_ref().map(ToString::to_string);

    let Some(snapshot) = store.commit(outcome).await else {
        debug!(target_name = %target, sequence, "discarding stale tick");
        return;
    };

    let timestamp = Utc::now().timestamp();
    if let Some(error) = error {
        let _ = events.send(PollEvent::FetchFailed {
            target,
            error,
            timestamp,
        });
    }
    let _ = events.send(PollEvent::Updated {
        snapshot,
        timestamp,
    });
}

/// Background task polling one target on its interval.
pub struct Poller {
    name: String,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawn the polling task. The first tick fires one interval from now.
    pub fn start(
        mut cycle: FetchCycle,
        store: SnapshotStore,
        events: broadcast::Sender<PollEvent>,
    ) -> Self {
        let name = cycle.name().to_string();
        let period = cycle.config().scan_interval;
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {}
                }

                let outcome = tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        debug!(target_name = %task_name, "abandoning in-flight fetch");
                        break;
                    }
                    outcome = cycle.tick() => outcome,
                };
                publish(&store, &events, outcome).await;
            }
        });

        info!(target_name = %name, every = ?period, "poller started");
        Self {
            name,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the task and wait for it to exit.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(target_name = %self.name, "poller task ended abnormally: {}", e);
            }
            info!(target_name = %self.name, "poller stopped");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
