//! Reconciler driving many resources to their desired state.
//!
//! This module plans every declared and recorded resource, runs one
//! orchestrator per resource on a bounded worker pool, and folds the
//! results into the state file sequentially once the workers finish.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::SharedClient;
use crate::config::{ConvergeConfig, DesiredDocument, DesiredHasher, ResourceDeclaration};
use crate::error::{ConfigError, ConvergeError, ReconcileError, Result};
use crate::orchestrator::{ApplyOutcome, Orchestrator, OrchestratorSettings};
use crate::planner::{
    ActionType, DriftRecord, Observation, PlanSummary, PlannedAction, ResourcePlan,
};
use crate::resource::{
    DesiredInput, DesiredState, LocalState, ResourceIdentifier, ResourceRegistry, ResourceType,
};
use crate::state::{
    holder_id, HistoryEntry, HistoryOperation, LockInfo, ResourceRecord, StateFile, StateStore,
};

/// Reconciler for a desired-state document.
pub struct Reconciler<S: StateStore> {
    /// Remote client shared by every worker.
    client: SharedClient,
    /// Resource type registry.
    registry: Arc<ResourceRegistry>,
    /// State store.
    store: S,
    /// Orchestrator timing settings.
    settings: OrchestratorSettings,
    /// Maximum number of resources handled at once.
    parallelism: usize,
    /// Desired-state hasher.
    hasher: DesiredHasher,
    /// Cancels in-flight waits and pending work.
    cancel: CancellationToken,
}

/// Options for [`Reconciler::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Delete and recreate resources whose immutable attributes drifted.
    pub allow_replace: bool,
}

/// How one resource fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// The action completed.
    Succeeded,
    /// The action was not attempted.
    Skipped,
    /// The action failed.
    Failed,
}

/// Result for a single resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceResult {
    /// Resource name.
    pub name: String,
    /// Resource type name.
    pub resource_type: String,
    /// Action that was planned.
    pub action: ActionType,
    /// What happened (e.g. `created`, `deleted`, `unchanged`).
    pub outcome: String,
    /// Result status.
    pub status: ResultStatus,
    /// Identifier of the resource afterwards, if it exists.
    pub id: Option<ResourceIdentifier>,
    /// Error or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Command that produced the report.
    pub command: &'static str,
    /// Per-resource results, in plan order.
    pub results: Vec<ResourceResult>,
    /// Counts of completed actions.
    pub summary: PlanSummary,
    /// Failures not tied to a single resource.
    pub errors: Vec<String>,
}

/// One resource handed to a worker.
struct Work {
    action: PlannedAction,
    resource: Arc<dyn ResourceType>,
    desired: Option<DesiredState>,
}

/// What a worker observed while planning.
enum Probe {
    Declared {
        declaration: ResourceDeclaration,
        record: ResourceRecord,
        resource: Arc<dyn ResourceType>,
        hash: String,
    },
    Orphan {
        record: ResourceRecord,
        resource: Arc<dyn ResourceType>,
    },
}

/// What a worker did.
enum Completion {
    Converged(LocalState, HistoryOperation),
    Removed,
    Blocked(String),
    Failed(ConvergeError),
}

impl<S: StateStore> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store.backend_type())
            .field("types", &self.registry.names())
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl<S: StateStore> Reconciler<S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        client: SharedClient,
        registry: Arc<ResourceRegistry>,
        store: S,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            client,
            registry,
            store,
            settings,
            parallelism: 1,
            hasher: DesiredHasher::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Creates a reconciler from the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource type definition is invalid.
    pub fn from_config(config: &ConvergeConfig, client: SharedClient, store: S) -> Result<Self> {
        let registry = ResourceRegistry::from_config(&config.resource_types)?;
        Ok(Self::new(
            client,
            Arc::new(registry),
            store,
            OrchestratorSettings::from_config(config),
        )
        .with_parallelism(config.parallelism))
    }

    /// Sets the maximum number of resources handled at once.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Uses the given token for cooperative cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the state store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Computes the plan for a document without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded, a type is unknown, or
    /// a lookup fails.
    pub async fn plan(&self, document: &DesiredDocument) -> Result<ResourcePlan> {
        let state = self.store.load_or_default().await?;
        self.build_plan(document, &state).await
    }

    /// Converges every resource in the document.
    ///
    /// Failures of individual resources are reported, not returned; the
    /// state of every other resource is still saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, planning fails, or the
    /// state cannot be saved.
    pub async fn apply(
        &self,
        document: &DesiredDocument,
        options: ApplyOptions,
    ) -> Result<ReconcileReport> {
        let lock = self.store.acquire_lock(&holder_id(), "apply").await?;
        let result = self.apply_locked(document, options).await;
        self.release(&lock).await;
        result
    }

    async fn apply_locked(
        &self,
        document: &DesiredDocument,
        options: ApplyOptions,
    ) -> Result<ReconcileReport> {
        let mut state = self.store.load_or_default().await?;
        let plan = self.build_plan(document, &state).await?;
        info!("Applying plan: {}", plan.summary());

        let mut report = ReconcileReport::new("apply");
        let mut work = Vec::new();

        for action in plan.actions {
            match action.action {
                ActionType::Noop => {
                    if let Some(mut record) = state.get(&action.name).cloned() {
                        if let Some(hash) = &action.desired_hash {
                            record.desired_hash.clone_from(hash);
                        }
                        state.upsert(record);
                    }
                    report.summary.record(ActionType::Noop);
                    report.push(&action, "unchanged", ResultStatus::Succeeded, action.id.clone(), None);
                }
                ActionType::Purge => {
                    info!("Forgetting '{}': resource no longer exists", action.name);
                    state.remove(&action.name);
                    state.add_history(HistoryEntry::new(HistoryOperation::Purge, &action.name, action.id.clone()));
                    report.summary.record(ActionType::Purge);
                    report.push(&action, "purged", ResultStatus::Succeeded, None, None);
                }
                _ => {
                    let resource = self.registry.resolve(&action.name, &action.resource_type)?;
                    let desired = document
                        .resource(&action.name)
                        .map(|d| DesiredState::new(d.attributes.clone()));
                    work.push(Work {
                        action,
                        resource,
                        desired,
                    });
                }
            }
        }

        self.execute(work, options, &mut state, &mut report).await;
        self.store.save(&state).await?;
        info!("Apply finished: {}", report.summary);
        Ok(report)
    }

    /// Plans the destruction of recorded resources.
    ///
    /// An empty `names` selects every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or a name is not recorded.
    pub async fn destroy_plan(&self, names: &[String]) -> Result<ResourcePlan> {
        let state = self.store.load_or_default().await?;
        Self::select(&state, names).map(|records| {
            ResourcePlan::new(records.into_iter().map(PlannedAction::destroy).collect())
        })
    }

    /// Deletes recorded resources and drops their records.
    ///
    /// An empty `names` selects every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, a name is not recorded,
    /// or the state cannot be saved.
    pub async fn destroy(&self, names: &[String]) -> Result<ReconcileReport> {
        let lock = self.store.acquire_lock(&holder_id(), "destroy").await?;
        let result = self.destroy_locked(names).await;
        self.release(&lock).await;
        result
    }

    async fn destroy_locked(&self, names: &[String]) -> Result<ReconcileReport> {
        let mut state = self.store.load_or_default().await?;
        let mut work = Vec::new();
        for record in Self::select(&state, names)? {
            work.push(Work {
                action: PlannedAction::destroy(record),
                resource: self.registry.resolve(&record.name, &record.resource_type)?,
                desired: None,
            });
        }
        info!("Destroying {} resource(s)", work.len());

        let mut report = ReconcileReport::new("destroy");
        self.execute(work, ApplyOptions::default(), &mut state, &mut report)
            .await;
        self.store.save(&state).await?;
        Ok(report)
    }

    /// Re-reads every recorded resource and folds the result into state.
    ///
    /// Records whose resource no longer exists are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, a type is unknown, or
    /// the state cannot be saved.
    pub async fn refresh(&self) -> Result<ReconcileReport> {
        let lock = self.store.acquire_lock(&holder_id(), "refresh").await?;
        let result = self.refresh_locked().await;
        self.release(&lock).await;
        result
    }

    async fn refresh_locked(&self) -> Result<ReconcileReport> {
        let mut state = self.store.load_or_default().await?;
        let mut targets = Vec::new();
        for record in state.resources.values() {
            let resource = self.registry.resolve(&record.name, &record.resource_type)?;
            targets.push((record.clone(), resource));
        }
        info!("Refreshing {} resource(s)", targets.len());

        let reads = self
            .run_pool(targets, |(record, resource)| {
                let orchestrator = self.orchestrator(&resource);
                async move {
                    let read = orchestrator.read(&record.id).await;
                    (record, read)
                }
            })
            .await;

        let mut report = ReconcileReport::new("refresh");
        for (mut record, read) in reads {
            let action = PlannedAction::refresh(&record);
            match read {
                Ok(Some(local)) => {
                    record.refresh(&local, None);
                    report.summary.record(ActionType::Noop);
                    state.upsert(record);
                    state.add_history(HistoryEntry::new(HistoryOperation::Refresh, &action.name, Some(local.id.clone())));
                    report.push(&action, "refreshed", ResultStatus::Succeeded, Some(local.id), None);
                }
                Ok(None) => {
                    warn!("'{}' ({}) no longer exists", record.name, record.id);
                    state.remove(&record.name);
                    state.add_history(HistoryEntry::new(HistoryOperation::Purge, &action.name, action.id.clone()));
                    report.summary.record(ActionType::Purge);
                    report.push(&action, "purged", ResultStatus::Succeeded, None, None);
                }
                Err(e) => {
                    error!("Failed to refresh '{}': {e}", record.name);
                    report.push(&action, "failed", ResultStatus::Failed, action.id.clone(), Some(e.to_string()));
                }
            }
        }

        self.store.save(&state).await?;
        Ok(report)
    }

    async fn build_plan(&self, document: &DesiredDocument, state: &StateFile) -> Result<ResourcePlan> {
        let mut actions = Vec::new();
        let mut probes = Vec::new();

        for declaration in &document.resources {
            let resource = self
                .registry
                .resolve(&declaration.name, &declaration.resource_type)?;
            let hash = self.hasher.hash_declaration(declaration);

            match state.get(&declaration.name) {
                None => actions.push(PlannedAction::classify(declaration, None, None, &hash)),
                Some(record) if record.resource_type != declaration.resource_type => {
                    return Err(ConfigError::validation(
                        format!(
                            "'{}' changed type from {} to {}; destroy it first",
                            declaration.name, record.resource_type, declaration.resource_type
                        ),
                        format!("resources.{}.type", declaration.name),
                    )
                    .into());
                }
                Some(record) => probes.push(Probe::Declared {
                    declaration: declaration.clone(),
                    record: record.clone(),
                    resource,
                    hash,
                }),
            }
        }

        for record in state.resources.values() {
            if document.resource(&record.name).is_none() {
                let resource = self.registry.resolve(&record.name, &record.resource_type)?;
                probes.push(Probe::Orphan {
                    record: record.clone(),
                    resource,
                });
            }
        }

        debug!(
            "Planning {} new and {} recorded resource(s)",
            actions.len(),
            probes.len()
        );

        let observed = self
            .run_pool(probes, |probe| {
                let orchestrator = match &probe {
                    Probe::Declared { resource, .. } | Probe::Orphan { resource, .. } => {
                        self.orchestrator(resource)
                    }
                };
                async move { observe(&orchestrator, probe).await }
            })
            .await;

        for action in observed {
            actions.push(action?);
        }
        Ok(ResourcePlan::new(actions))
    }

    async fn execute(
        &self,
        work: Vec<Work>,
        options: ApplyOptions,
        state: &mut StateFile,
        report: &mut ReconcileReport,
    ) {
        let cancel = self.cancel.clone();
        let expected = work.len();
        let completions = self
            .run_pool(work, |work| {
                let orchestrator = self.orchestrator(&work.resource);
                let cancel = cancel.clone();
                async move {
                    let completion = run(&orchestrator, &work, options, &cancel).await;
                    (work.action, completion)
                }
            })
            .await;

        if completions.len() < expected {
            report.errors.push(String::from("worker results were lost"));
        }
        for (action, completion) in completions {
            fold(state, report, action, completion);
        }
    }

    /// Runs `task` for every item with at most `parallelism` in flight.
    ///
    /// Results come back in item order. A panicked task is logged and dropped.
    async fn run_pool<T, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<Fut::Output>
    where
        F: Fn(T) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut set = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let future = task(item);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, future.await)
            });
        }

        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Worker task failed: {e}"),
            }
        }
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, output)| output).collect()
    }

    fn orchestrator(&self, resource: &Arc<dyn ResourceType>) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.client),
            Arc::clone(resource),
            self.settings.clone(),
        )
        .with_cancellation(self.cancel.clone())
    }

    fn select<'s>(state: &'s StateFile, names: &[String]) -> Result<Vec<&'s ResourceRecord>> {
        if names.is_empty() {
            return Ok(state.resources.values().collect());
        }
        names
            .iter()
            .map(|name| {
                state.get(name).ok_or_else(|| {
                    ConfigError::validation(format!("'{name}' is not in state"), "names").into()
                })
            })
            .collect()
    }

    async fn release(&self, lock: &LockInfo) {
        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
    }
}

/// Looks up one recorded resource and classifies it.
async fn observe(orchestrator: &Orchestrator, probe: Probe) -> Result<PlannedAction> {
    match probe {
        Probe::Declared {
            declaration,
            record,
            hash,
            ..
        } => {
            let desired = DesiredState::new(declaration.attributes.clone());
            let observation = orchestrator
                .drift(&record.id, &desired)
                .await?
                .map_or(Observation::Missing, Observation::Present);
            Ok(PlannedAction::classify(
                &declaration,
                Some(&record),
                Some(observation),
                &hash,
            ))
        }
        Probe::Orphan { record, .. } => {
            let observation = orchestrator
                .read(&record.id)
                .await?
                .map_or(Observation::Missing, |_| {
                    Observation::Present(DriftRecord::default())
                });
            Ok(PlannedAction::orphan(&record, &observation))
        }
    }
}

/// Carries out one planned action.
async fn run(
    orchestrator: &Orchestrator,
    work: &Work,
    options: ApplyOptions,
    cancel: &CancellationToken,
) -> Completion {
    if cancel.is_cancelled() {
        return Completion::Failed(
            ReconcileError::Aborted {
                reason: String::from("cancelled before start"),
            }
            .into(),
        );
    }

    let action = &work.action;
    let result = match (action.action, &action.id, &work.desired) {
        (ActionType::Delete, Some(id), _) => orchestrator.delete(id).await.map(|_| Completion::Removed),
        (ActionType::Create, _, Some(desired)) => orchestrator
            .create(desired)
            .await
            .map(|state| Completion::Converged(state, HistoryOperation::Create)),
        (ActionType::Update, Some(id), Some(desired)) => {
            converge(orchestrator, id, desired, options).await
        }
        (ActionType::Replace, Some(id), Some(desired)) => {
            if options.allow_replace {
                orchestrator
                    .replace(id, desired)
                    .await
                    .map(|state| Completion::Converged(state, HistoryOperation::Replace))
            } else {
                Ok(blocked(&action.replacement_attributes))
            }
        }
        (kind, _, _) => Ok(Completion::Blocked(format!("cannot {kind} '{}'", action.name))),
    };

    result.unwrap_or_else(Completion::Failed)
}

/// Updates a resource in place, replacing it only if allowed.
async fn converge(
    orchestrator: &Orchestrator,
    id: &ResourceIdentifier,
    desired: &DesiredState,
    options: ApplyOptions,
) -> Result<Completion> {
    let input = DesiredInput::new(desired.clone()).with_previous_id(id.clone());
    let completion = match orchestrator.apply(&input).await? {
        ApplyOutcome::Created(state) | ApplyOutcome::Recreated { state, .. } => {
            Completion::Converged(state, HistoryOperation::Create)
        }
        ApplyOutcome::Updated(state) | ApplyOutcome::Unchanged(state) => {
            Completion::Converged(state, HistoryOperation::Update)
        }
        ApplyOutcome::ReplacementRequired { id, attributes } => {
            if !options.allow_replace {
                return Ok(blocked(&attributes));
            }
            let state = orchestrator.replace(&id, desired).await?;
            Completion::Converged(state, HistoryOperation::Replace)
        }
    };
    Ok(completion)
}

fn blocked(attributes: &[String]) -> Completion {
    Completion::Blocked(format!(
        "replacement required ({} changed); rerun with --allow-replace",
        attributes.join(", ")
    ))
}

/// Folds one worker result into the state file and the report.
fn fold(state: &mut StateFile, report: &mut ReconcileReport, action: PlannedAction, completion: Completion) {
    let hash = action.desired_hash.clone().unwrap_or_default();

    match completion {
        Completion::Converged(local, operation) => {
            let record = match state.get(&action.name) {
                Some(existing) if existing.id == local.id => {
                    let mut record = existing.clone();
                    record.refresh(&local, Some(&hash));
                    record
                }
                _ => ResourceRecord::applied(&action.name, &action.resource_type, &local, &hash),
            };
            state.upsert(record);
            state.add_history(HistoryEntry::new(operation, &action.name, Some(local.id.clone())));
            report.summary.record(action.action);
            report.push(&action, &operation_label(operation), ResultStatus::Succeeded, Some(local.id), None);
        }
        Completion::Removed => {
            state.remove(&action.name);
            state.add_history(HistoryEntry::new(HistoryOperation::Delete, &action.name, action.id.clone()));
            report.summary.record(ActionType::Delete);
            report.push(&action, "deleted", ResultStatus::Succeeded, None, None);
        }
        Completion::Blocked(reason) => {
            warn!("Skipping '{}': {reason}", action.name);
            report.push(&action, "skipped", ResultStatus::Skipped, action.id.clone(), Some(reason));
        }
        Completion::Failed(err) => {
            error!("{} of '{}' failed: {err}", action.action, action.name);
            let message = err.to_string();
            let id = match err.resource_id() {
                Some(id) => {
                    let record = match state.get(&action.name) {
                        Some(existing) if &existing.id == id => {
                            let mut record = existing.clone();
                            record.taint(&message);
                            record
                        }
                        _ => ResourceRecord::tainted(&action.name, &action.resource_type, id.clone(), &message),
                    };
                    state.upsert(record);
                    Some(id.clone())
                }
                None => {
                    if action.action != ActionType::Delete {
                        if let Some(mut record) = state.get(&action.name).cloned() {
                            record.taint(&message);
                            state.upsert(record);
                        }
                    }
                    action.id.clone()
                }
            };
            state.add_history(HistoryEntry::failed(history_operation(action.action), &action.name, id.clone(), &message));
            report.push(&action, "failed", ResultStatus::Failed, id, Some(message));
        }
    }
}

const fn history_operation(action: ActionType) -> HistoryOperation {
    match action {
        ActionType::Create => HistoryOperation::Create,
        ActionType::Update => HistoryOperation::Update,
        ActionType::Replace => HistoryOperation::Replace,
        ActionType::Delete => HistoryOperation::Delete,
        ActionType::Purge => HistoryOperation::Purge,
        ActionType::Noop => HistoryOperation::Refresh,
    }
}

fn operation_label(operation: HistoryOperation) -> String {
    match operation {
        HistoryOperation::Create => String::from("created"),
        HistoryOperation::Update => String::from("updated"),
        HistoryOperation::Replace => String::from("replaced"),
        other => other.to_string(),
    }
}

impl ReconcileReport {
    /// Creates an empty report for a command.
    #[must_use]
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            results: Vec::new(),
            summary: PlanSummary::default(),
            errors: Vec::new(),
        }
    }

    fn push(
        &mut self,
        action: &PlannedAction,
        outcome: &str,
        status: ResultStatus,
        id: Option<ResourceIdentifier>,
        message: Option<String>,
    ) {
        self.results.push(ResourceResult {
            name: action.name.clone(),
            resource_type: action.resource_type.clone(),
            action: action.action,
            outcome: outcome.to_string(),
            status,
            id,
            message,
        });
    }

    /// Returns true if no resource failed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.errors.is_empty() && self.failed().next().is_none()
    }

    /// Results of resources that failed.
    pub fn failed(&self) -> impl Iterator<Item = &ResourceResult> {
        self.results.iter().filter(|r| r.status == ResultStatus::Failed)
    }

    /// Results of resources that were skipped.
    pub fn skipped(&self) -> impl Iterator<Item = &ResourceResult> {
        self.results.iter().filter(|r| r.status == ResultStatus::Skipped)
    }

    /// Looks up the result for a resource.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success() { "successful" } else { "failed" };
        writeln!(f, "{} {status}:", self.command)?;
        writeln!(f, "  Created: {}", self.summary.create)?;
        writeln!(f, "  Updated: {}", self.summary.update)?;
        writeln!(f, "  Replaced: {}", self.summary.replace)?;
        writeln!(f, "  Deleted: {}", self.summary.delete)?;
        writeln!(f, "  Unchanged: {}", self.summary.noop)?;

        let problems: Vec<&ResourceResult> = self.failed().chain(self.skipped()).collect();
        if !problems.is_empty() || !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for result in problems {
                writeln!(
                    f,
                    "    - {} ({}): {}",
                    result.name,
                    result.outcome,
                    result.message.as_deref().unwrap_or("unknown error")
                )?;
            }
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::scripted::ScriptedClient;
    use crate::client::{AttrValue, Attributes};
    use crate::error::{ClientError, StateError};
    use crate::orchestrator::RetryPolicy;
    use crate::resource::{table_type, StatusTag};
    use crate::state::RecordStatus;
    use crate::wait::WaitConfig;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;

    const ARN: &str = "arn:table/orders";

    /// In-memory state store.
    #[derive(Default)]
    struct MemoryStore {
        state: Mutex<Option<StateFile>>,
        lock: Mutex<Option<LockInfo>>,
    }

    #[async_trait]
    impl StateStore for MemoryStore {
        async fn load(&self) -> Result<Option<StateFile>> {
            Ok(self.state.lock().await.clone())
        }

        async fn save(&self, state: &StateFile) -> Result<()> {
            *self.state.lock().await = Some(state.clone());
            Ok(())
        }

        async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
            let mut lock = self.lock.lock().await;
            if let Some(existing) = lock.as_ref() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            let info = LockInfo::new(holder, operation);
            *lock = Some(info.clone());
            Ok(info)
        }

        async fn release_lock(&self, lock_id: &str) -> Result<()> {
            let mut lock = self.lock.lock().await;
            if lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
                *lock = None;
            }
            Ok(())
        }

        async fn force_unlock(&self) -> Result<Option<LockInfo>> {
            Ok(self.lock.lock().await.take())
        }

        async fn lock_info(&self) -> Result<Option<LockInfo>> {
            Ok(self.lock.lock().await.clone())
        }

        fn backend_type(&self) -> &'static str {
            "memory"
        }
    }

    fn reconciler(client: &Arc<ScriptedClient>) -> Reconciler<MemoryStore> {
        let mut registry = ResourceRegistry::new();
        registry
            .register(Arc::new(table_type()))
            .expect("registers table");
        let settings = OrchestratorSettings {
            retry: RetryPolicy {
                conflict_max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                deadline: Duration::from_secs(30),
            },
            wait: WaitConfig::default()
                .with_poll_interval(Duration::from_secs(1))
                .with_timeout(Duration::from_secs(60))
                .with_not_found_checks(3),
        };
        Reconciler::new(client.clone(), Arc::new(registry), MemoryStore::default(), settings)
            .with_parallelism(4)
    }

    fn map(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn table(status: &str, name: &str) -> Attributes {
        let inner = map(&[("arn", ARN.into()), ("status", status.into()), ("name", name.into())]);
        map(&[("Table", AttrValue::Map(inner))])
    }

    fn document(pairs: &[(&str, AttrValue)]) -> DesiredDocument {
        DesiredDocument {
            resources: vec![ResourceDeclaration {
                name: String::from("orders"),
                resource_type: String::from("table"),
                attributes: map(pairs),
            }],
        }
    }

    fn recorded(name: &str) -> StateFile {
        let local = LocalState {
            id: ResourceIdentifier::new(ARN),
            status: StatusTag::Available,
            attributes: Attributes::new(),
        };
        let mut state = StateFile::new();
        state.upsert(ResourceRecord::applied(name, "table", &local, "old-hash"));
        state
    }

    fn not_found() -> ClientError {
        ClientError::not_found("DescribeTable", "Requested resource not found")
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_creates_then_converges() {
        let client = Arc::new(ScriptedClient::new());
        client.on("CreateTable", Ok(table("CREATING", "orders")));
        client.on("DescribeTable", Ok(table("ACTIVE", "orders")));
        let reconciler = reconciler(&client);
        let wanted = document(&[("name", "orders".into())]);

        let plan = reconciler.plan(&wanted).await.expect("plan");
        assert_eq!(plan.summary().create, 1);
        assert_eq!(client.count("CreateTable"), 0);

        let report = reconciler
            .apply(&wanted, ApplyOptions::default())
            .await
            .expect("apply");
        assert!(report.success());
        assert_eq!(report.summary.create, 1);

        let state = reconciler.store().load().await.expect("load").expect("saved");
        let record = state.get("orders").expect("recorded");
        assert_eq!(record.id, ResourceIdentifier::new(ARN));
        assert!(record.is_applied());
        assert_eq!(state.history.len(), 1);
        assert!(reconciler.store().lock_info().await.expect("info").is_none());

        let again = reconciler.plan(&wanted).await.expect("plan");
        assert!(!again.has_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_create_is_recorded_tainted() {
        let client = Arc::new(ScriptedClient::new());
        client.on("CreateTable", Ok(table("CREATING", "orders")));
        client.on("TagResource", Err(ClientError::fatal("TagResource", "access denied")));
        let reconciler = reconciler(&client);
        let tags = AttrValue::Map(map(&[("team", "data".into())]));
        let wanted = document(&[("name", "orders".into()), ("tags", tags)]);

        let report = reconciler
            .apply(&wanted, ApplyOptions::default())
            .await
            .expect("apply runs");
        assert!(!report.success());
        let result = report.get("orders").expect("result");
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.id, Some(ResourceIdentifier::new(ARN)));

        let state = reconciler.store().load().await.expect("load").expect("saved");
        let record = state.get("orders").expect("identifier kept");
        assert_eq!(record.status, RecordStatus::Tainted);
        assert!(record.last_error.as_deref().is_some_and(|e| e.contains("tag")));
        assert!(!state.history[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_is_deleted() {
        let client = Arc::new(ScriptedClient::new());
        client.on("DescribeTable", Ok(table("ACTIVE", "legacy")));
        client.on("DescribeTable", Err(not_found()));
        client.ok("DeleteTable", &[]);
        let reconciler = reconciler(&client);
        reconciler.store().save(&recorded("legacy")).await.expect("seed");

        let report = reconciler
            .apply(&DesiredDocument::default(), ApplyOptions::default())
            .await
            .expect("apply");
        assert!(report.success());
        assert_eq!(report.summary.delete, 1);
        assert_eq!(client.count("DeleteTable"), 1);

        let state = reconciler.store().load().await.expect("load").expect("saved");
        assert!(state.get("legacy").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_needs_permission() {
        let client = Arc::new(ScriptedClient::new());
        client.on("DescribeTable", Ok(table("ACTIVE", "renamed")));
        let reconciler = reconciler(&client);
        reconciler.store().save(&recorded("orders")).await.expect("seed");
        let wanted = document(&[("name", "orders".into())]);

        let report = reconciler
            .apply(&wanted, ApplyOptions::default())
            .await
            .expect("apply");
        let result = report.get("orders").expect("result");
        assert_eq!(result.action, ActionType::Replace);
        assert_eq!(result.status, ResultStatus::Skipped);
        assert!(report.success());
        assert_eq!(client.count("DeleteTable"), 0);
        assert_eq!(client.count("CreateTable"), 0);
    }

    #[tokio::test]
    async fn test_apply_respects_lock() {
        let client = Arc::new(ScriptedClient::new());
        let reconciler = reconciler(&client);
        reconciler
            .store()
            .acquire_lock("someone-else", "apply")
            .await
            .expect("lock");

        let err = reconciler
            .apply(&DesiredDocument::default(), ApplyOptions::default())
            .await
            .expect_err("locked");
        assert!(matches!(
            err,
            ConvergeError::State(StateError::LockedByOther { .. })
        ));
    }

    #[tokio::test]
    async fn test_destroy_unknown_name() {
        let client = Arc::new(ScriptedClient::new());
        let reconciler = reconciler(&client);
        reconciler.store().save(&recorded("orders")).await.expect("seed");

        let err = reconciler
            .destroy(&[String::from("missing")])
            .await
            .expect_err("not recorded");
        assert!(matches!(err, ConvergeError::Config(_)));
        assert!(reconciler.store().lock_info().await.expect("info").is_none());

        let plan = reconciler.destroy_plan(&[]).await.expect("plan");
        assert_eq!(plan.summary().delete, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_purges_vanished_records() {
        let client = Arc::new(ScriptedClient::new());
        client.on("DescribeTable", Err(not_found()));
        let reconciler = reconciler(&client);
        reconciler.store().save(&recorded("orders")).await.expect("seed");

        let report = reconciler.refresh().await.expect("refresh");
        assert_eq!(report.get("orders").map(|r| r.outcome.as_str()), Some("purged"));

        let state = reconciler.store().load().await.expect("load").expect("saved");
        assert!(state.resources.is_empty());
        assert_eq!(state.history[0].operation, HistoryOperation::Purge);
    }

    #[tokio::test]
    async fn test_unknown_type_fails_planning() {
        let client = Arc::new(ScriptedClient::new());
        let reconciler = reconciler(&client);
        let mut wanted = document(&[]);
        wanted.resources[0].resource_type = String::from("bucket");

        let err = reconciler.plan(&wanted).await.expect_err("unknown type");
        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::UnknownResourceType { .. })
        ));
    }
}
