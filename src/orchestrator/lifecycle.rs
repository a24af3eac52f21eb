//! The mutation orchestrator.
//!
//! Drives one lifecycle operation on one resource to completion: issue the
//! provider calls in order, wait for the asynchronous work to settle, then
//! read the canonical state back. There is no rollback; every partial
//! failure is reported with enough context to resume.

use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{Attributes, Operation, SharedClient};
use crate::config::ConvergeConfig;
use crate::error::{ConvergeError, ReconcileError, Result};
use crate::lookup::{find_visible, finder_for, probe, Finder, Lookup};
use crate::planner::{DriftReconciler, DriftRecord};
use crate::resource::{
    DesiredInput, DesiredState, LifecycleStage, LocalState, MutationCall, PendingOperation,
    RemoteState, ResourceIdentifier, ResourceType,
};
use crate::wait::{StatusPoller, WaitConfig, WaitOutcome};

use super::retry::RetryPolicy;

/// Engine-wide timing settings for the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Mutation retry policy.
    pub retry: RetryPolicy,
    /// Default wait settings, refined per resource type and stage.
    pub wait: WaitConfig,
}

impl OrchestratorSettings {
    /// Builds the settings from the engine configuration.
    #[must_use]
    pub const fn from_config(config: &ConvergeConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            wait: WaitConfig::from_polling(&config.polling),
        }
    }
}

/// Result of an in-place update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Desired and remote state already agree.
    Unchanged(LocalState),
    /// Mutable drift was converged in place.
    Updated {
        /// State read back after the update.
        state: LocalState,
        /// Number of provider calls issued.
        calls: usize,
    },
    /// Immutable attributes drifted; no call was issued.
    ReplacementRequired {
        /// Identifier of the existing resource.
        id: ResourceIdentifier,
        /// Attributes forcing replacement.
        attributes: Vec<String>,
        /// Full drift record.
        drift: DriftRecord,
    },
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The resource was deleted.
    Deleted,
    /// The resource did not exist.
    AlreadyGone,
}

/// Result of converging one desired input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new resource was created.
    Created(LocalState),
    /// An existing resource was updated in place.
    Updated(LocalState),
    /// The resource already matched.
    Unchanged(LocalState),
    /// The previous resource had vanished and a new one was created.
    Recreated {
        /// State of the new resource.
        state: LocalState,
        /// Identifier of the vanished resource.
        previous: ResourceIdentifier,
    },
    /// Immutable drift requires replacing the resource.
    ReplacementRequired {
        /// Identifier of the existing resource.
        id: ResourceIdentifier,
        /// Attributes forcing replacement.
        attributes: Vec<String>,
    },
}

impl ApplyOutcome {
    /// Returns the converged local state, if any.
    #[must_use]
    pub const fn state(&self) -> Option<&LocalState> {
        match self {
            Self::Created(state)
            | Self::Updated(state)
            | Self::Unchanged(state)
            | Self::Recreated { state, .. } => Some(state),
            Self::ReplacementRequired { .. } => None,
        }
    }

    /// Short action label for reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Unchanged(_) => "unchanged",
            Self::Recreated { .. } => "recreated",
            Self::ReplacementRequired { .. } => "replacement required",
        }
    }
}

/// Sequences lifecycle operations for resources of one type.
pub struct Orchestrator {
    client: SharedClient,
    resource: Arc<dyn ResourceType>,
    finder: Arc<dyn Finder>,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("client", &self.client)
            .field("resource", &self.resource.type_name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator for one resource type.
    #[must_use]
    pub fn new(
        client: SharedClient,
        resource: Arc<dyn ResourceType>,
        settings: OrchestratorSettings,
    ) -> Self {
        let finder = finder_for(Arc::clone(&resource), Arc::clone(&client));
        Self {
            client,
            resource,
            finder,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses the given token for cooperative cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the resource type being managed.
    #[must_use]
    pub fn resource_type(&self) -> &dyn ResourceType {
        self.resource.as_ref()
    }

    /// Creates a resource and waits until it is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the create call fails. Once the provider has
    /// assigned an identifier, every later failure is reported as
    /// [`ReconcileError::PartiallyApplied`] carrying that identifier and
    /// the failed stage.
    pub async fn create(&self, desired: &DesiredState) -> Result<LocalState> {
        let type_name = self.resource.type_name();
        let operation = self.resource.create_operation();
        let client_token = Uuid::new_v4().to_string();
        info!("Creating {type_name} resource");

        let request = self.resource.build_create_request(desired, &client_token);
        let response = self
            .mutate(&operation, &request)
            .await
            .map_err(|e| e.during(operation.name.clone(), None))?;

        let id = self
            .resource
            .identifier_from_response(&response)
            .ok_or_else(|| ReconcileError::MissingIdentifier {
                resource_type: type_name.to_string(),
                operation: operation.name.clone(),
            })?;
        info!("Created {type_name} {id}");

        match self.finish_create(&id, desired).await {
            Ok(state) => Ok(state),
            Err((stage, source)) => {
                warn!("{type_name} {id} exists but {stage} failed: {source}");
                Err(ReconcileError::PartiallyApplied {
                    id,
                    stage,
                    source: Box::new(source),
                }
                .into())
            }
        }
    }

    /// Post-create steps, the create wait and the read-back.
    async fn finish_create(
        &self,
        id: &ResourceIdentifier,
        desired: &DesiredState,
    ) -> std::result::Result<LocalState, (String, ConvergeError)> {
        let (stable, immediate): (Vec<MutationCall>, Vec<MutationCall>) = self
            .resource
            .post_create_steps(id, desired)
            .into_iter()
            .partition(|step| step.requires_stable);

        for step in &immediate {
            self.run_step(step).await.map_err(|e| (step.step.clone(), e))?;
        }

        self.await_stage(id, LifecycleStage::Create)
            .await
            .map_err(|e| (String::from("wait"), e))?;

        for step in &stable {
            self.run_step(step).await.map_err(|e| (step.step.clone(), e))?;
            self.await_stage(id, LifecycleStage::Update)
                .await
                .map_err(|e| (format!("{} wait", step.step), e))?;
        }

        let state = self
            .read_back(id)
            .await
            .map_err(|e| (String::from("read"), e))?;
        Ok(self.fold(&state))
    }

    /// Refreshes a resource's local state.
    ///
    /// Returns `None` when the resource no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn read(&self, id: &ResourceIdentifier) -> Result<Option<LocalState>> {
        let lookup = self
            .finder
            .find(id)
            .await
            .map_err(|e| e.during(self.resource.describe_operation().name, Some(id)))?;
        Ok(lookup.into_state().map(|state| self.fold(&state)))
    }

    /// Computes the drift of an existing resource without changing it.
    ///
    /// Returns `None` when the resource no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn drift(
        &self,
        id: &ResourceIdentifier,
        desired: &DesiredState,
    ) -> Result<Option<DriftRecord>> {
        let lookup = self
            .finder
            .find(id)
            .await
            .map_err(|e| e.during(self.resource.describe_operation().name, Some(id)))?;
        Ok(lookup.into_state().map(|state| self.diff(desired, &state)))
    }

    /// Converges mutable drift of an existing resource in place.
    ///
    /// Immutable drift yields [`UpdateOutcome::ReplacementRequired`] without
    /// issuing any mutating call.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ResourceGone`] if the resource no longer
    /// exists, or the wrapped failure of the call or wait that failed.
    pub async fn update(
        &self,
        id: &ResourceIdentifier,
        desired: &DesiredState,
    ) -> Result<UpdateOutcome> {
        let type_name = self.resource.type_name();
        let lookup = self
            .finder
            .find(id)
            .await
            .map_err(|e| e.during(self.resource.describe_operation().name, Some(id)))?;
        let Lookup::Found(current) = lookup else {
            return Err(ReconcileError::ResourceGone { id: id.clone() }.into());
        };

        let drift = self.diff(desired, &current);
        if drift.is_empty() {
            debug!("{type_name} {id} is in sync");
            return Ok(UpdateOutcome::Unchanged(self.fold(&current)));
        }

        if drift.requires_replacement() {
            let attributes: Vec<String> = drift
                .replacement_attributes()
                .into_iter()
                .map(String::from)
                .collect();
            warn!(
                "{type_name} {id} requires replacement: {} changed",
                attributes.join(", ")
            );
            return Ok(UpdateOutcome::ReplacementRequired {
                id: id.clone(),
                attributes,
                drift,
            });
        }

        let calls = self.resource.update_calls(id, &drift, desired);
        if calls.is_empty() {
            warn!("No update call covers the drift of {type_name} {id}:\n{drift}");
            return Ok(UpdateOutcome::Unchanged(self.fold(&current)));
        }

        info!("Updating {type_name} {id} ({} call(s))", calls.len());
        if current.status().is_in_progress() {
            self.await_stage(id, LifecycleStage::Update)
                .await
                .map_err(|e| e.during("pre-update wait", Some(id)))?;
        }

        for (index, call) in calls.iter().enumerate() {
            if call.requires_stable && index > 0 {
                self.await_stage(id, LifecycleStage::Update)
                    .await
                    .map_err(|e| e.during(format!("{} wait", call.step), Some(id)))?;
            }
            match self.run_step(call).await {
                Ok(()) => {}
                Err(ConvergeError::Client(e)) if e.is_not_found() => {
                    return Err(ReconcileError::ResourceGone { id: id.clone() }.into());
                }
                Err(e) => return Err(e.during(call.step.clone(), Some(id))),
            }
        }

        self.await_stage(id, LifecycleStage::Update)
            .await
            .map_err(|e| e.during("update wait", Some(id)))?;
        let state = self
            .read_back(id)
            .await
            .map_err(|e| e.during("read", Some(id)))?;

        info!("Updated {type_name} {id}");
        Ok(UpdateOutcome::Updated {
            state: self.fold(&state),
            calls: calls.len(),
        })
    }

    /// Deletes a resource and waits until it is gone.
    ///
    /// Deleting a resource that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns the wrapped failure of the delete call or the deletion wait.
    pub async fn delete(&self, id: &ResourceIdentifier) -> Result<DeleteOutcome> {
        let type_name = self.resource.type_name();
        let operation = self.resource.delete_operation();
        info!("Deleting {type_name} {id}");

        match self.mutate(&operation, &self.resource.delete_request(id)).await {
            Ok(_) => {}
            Err(ConvergeError::Client(e)) if e.is_not_found() => {
                info!("{type_name} {id} already deleted");
                return Ok(DeleteOutcome::AlreadyGone);
            }
            Err(e) => return Err(e.during(operation.name, Some(id))),
        }

        self.await_stage(id, LifecycleStage::Delete)
            .await
            .map_err(|e| e.during("delete wait", Some(id)))?;

        info!("Deleted {type_name} {id}");
        Ok(DeleteOutcome::Deleted)
    }

    /// Converges one desired input.
    ///
    /// Without a previous identifier the resource is created. With one it is
    /// updated, or recreated if it has vanished.
    ///
    /// # Errors
    ///
    /// Returns the failure of the underlying create or update.
    pub async fn apply(&self, input: &DesiredInput) -> Result<ApplyOutcome> {
        let Some(previous) = &input.previous_id else {
            return Ok(ApplyOutcome::Created(self.create(&input.desired).await?));
        };

        match self.update(previous, &input.desired).await {
            Ok(UpdateOutcome::Unchanged(state)) => Ok(ApplyOutcome::Unchanged(state)),
            Ok(UpdateOutcome::Updated { state, .. }) => Ok(ApplyOutcome::Updated(state)),
            Ok(UpdateOutcome::ReplacementRequired { id, attributes, .. }) => {
                Ok(ApplyOutcome::ReplacementRequired { id, attributes })
            }
            Err(ConvergeError::Reconcile(ReconcileError::ResourceGone { id })) => {
                warn!(
                    "{} {id} has vanished, creating a new one",
                    self.resource.type_name()
                );
                let state = self.create(&input.desired).await?;
                Ok(ApplyOutcome::Recreated {
                    state,
                    previous: id,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Replaces a resource: deletes it, then creates it from `desired`.
    ///
    /// # Errors
    ///
    /// Returns the failure of the delete or the create.
    pub async fn replace(
        &self,
        id: &ResourceIdentifier,
        desired: &DesiredState,
    ) -> Result<LocalState> {
        info!("Replacing {} {id}", self.resource.type_name());
        self.delete(id).await?;
        self.create(desired).await
    }

    async fn mutate(&self, operation: &Operation, request: &Attributes) -> Result<Attributes> {
        self.settings
            .retry
            .invoke(self.client.as_ref(), operation, request, &self.cancel)
            .await
    }

    async fn run_step(&self, step: &MutationCall) -> Result<()> {
        debug!("Running {} step via {}", step.step, step.operation);
        self.mutate(&step.operation, &step.request).await?;
        Ok(())
    }

    async fn await_stage(
        &self,
        id: &ResourceIdentifier,
        stage: LifecycleStage,
    ) -> Result<WaitOutcome> {
        let spec = self.resource.wait_spec(stage);
        let pending = PendingOperation::new(
            id.clone(),
            stage.operation_kind(),
            spec.target.iter().cloned(),
            spec.failure.iter().cloned(),
        )?;
        let poller = StatusPoller::new(self.settings.wait.for_spec(&spec))
            .with_cancellation(self.cancel.clone());

        let finder: &dyn Finder = self.finder.as_ref();
        let resource: &dyn ResourceType = self.resource.as_ref();
        let outcome = poller
            .wait(&pending, move || probe(finder, resource, id))
            .await?;

        debug!(
            "{stage} of {id} settled as {} after {} probe(s)",
            outcome.status, outcome.probes
        );
        Ok(outcome)
    }

    /// Reads the canonical state, tolerating read-after-write lag.
    async fn read_back(&self, id: &ResourceIdentifier) -> Result<RemoteState> {
        let wait = &self.settings.wait;
        let lookup = find_visible(
            self.finder.as_ref(),
            id,
            wait.not_found_checks,
            wait.poll_interval,
            &self.cancel,
        )
        .await?;
        lookup
            .into_state()
            .ok_or_else(|| ReconcileError::ResourceGone { id: id.clone() }.into())
    }

    fn diff(&self, desired: &DesiredState, current: &RemoteState) -> DriftRecord {
        let remote = self.resource.map_remote_to_local(current);
        DriftReconciler::new(self.resource.semantics()).reconcile(desired.attributes(), &remote)
    }

    fn fold(&self, state: &RemoteState) -> LocalState {
        LocalState {
            id: state.id().clone(),
            status: state.status().clone(),
            attributes: self.resource.map_remote_to_local(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::scripted::ScriptedClient;
    use crate::client::{AttrValue, MockRemoteClient};
    use crate::error::{ClientError, WaitError};
    use crate::resource::{table_type, StatusTag};
    use std::time::Duration;

    const ARN: &str = "arn:table/orders";

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
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
        }
    }

    fn orchestrator(client: &Arc<ScriptedClient>) -> Orchestrator {
        Orchestrator::new(client.clone(), Arc::new(table_type()), settings())
    }

    fn map(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn table(status: &str, extra: &[(&str, AttrValue)]) -> Attributes {
        let mut inner = map(&[("arn", ARN.into()), ("status", status.into())]);
        inner.extend(map(extra));
        map(&[("Table", AttrValue::Map(inner))])
    }

    fn tags(pairs: &[(&str, &str)]) -> AttrValue {
        AttrValue::Map(pairs.iter().map(|(k, v)| ((*k).to_string(), AttrValue::from(*v))).collect())
    }

    fn desired(pairs: &[(&str, AttrValue)]) -> DesiredState {
        DesiredState::new(map(pairs))
    }

    fn not_found() -> ClientError {
        ClientError::not_found("DescribeTable", "Requested resource not found")
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_tags_waits_and_reads_back() {
        let client = Arc::new(ScriptedClient::new());
        client.on("CreateTable", Ok(table("CREATING", &[])));
        client.ok("TagResource", &[]);
        client.on("DescribeTable", Ok(table("CREATING", &[])));
        client.on(
            "DescribeTable",
            Ok(table("ACTIVE", &[("name", "orders".into()), ("tags", tags(&[("team", "data")]))])),
        );

        let wanted = desired(&[("name", "orders".into()), ("tags", tags(&[("team", "data")]))]);
        let state = orchestrator(&client).create(&wanted).await.expect("create succeeds");

        assert_eq!(state.id, ResourceIdentifier::new(ARN));
        assert_eq!(state.status, StatusTag::Available);
        assert_eq!(state.attributes.get("name"), Some(&AttrValue::from("orders")));
        assert!(!state.attributes.contains_key("status"));
        assert_eq!(
            client.call_names(),
            vec!["CreateTable", "TagResource", "DescribeTable", "DescribeTable", "DescribeTable"]
        );

        let (_, create_request) = &client.calls()[0];
        assert!(create_request.contains_key("client_token"));
        assert!(!create_request.contains_key("tags"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_failure_keeps_identifier() {
        let client = Arc::new(ScriptedClient::new());
        client.on("CreateTable", Ok(table("CREATING", &[])));
        client.on(
            "TagResource",
            Err(ClientError::InvalidInput {
                operation: String::from("TagResource"),
                message: String::from("too many tags"),
            }),
        );

        let wanted = desired(&[("name", "orders".into()), ("tags", tags(&[("team", "data")]))]);
        let err = orchestrator(&client).create(&wanted).await.expect_err("tagging fails");

        assert_eq!(err.resource_id(), Some(&ResourceIdentifier::new(ARN)));
        match err {
            ConvergeError::Reconcile(ReconcileError::PartiallyApplied { stage, .. }) => {
                assert_eq!(stage, "tag");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.count("DescribeTable"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_wait_keeps_identifier() {
        let client = Arc::new(ScriptedClient::new());
        client.on("CreateTable", Ok(table("CREATING", &[])));
        client.on("DescribeTable", Ok(table("ARCHIVED", &[("status_reason", "kms key disabled".into())])));

        let err = orchestrator(&client)
            .create(&desired(&[("name", "orders".into())]))
            .await
            .expect_err("provider reports failure");

        assert_eq!(err.resource_id(), Some(&ResourceIdentifier::new(ARN)));
        assert!(err.to_string().contains("kms key disabled"));
    }

    #[tokio::test]
    async fn test_missing_identifier() {
        let client = Arc::new(ScriptedClient::new());
        client.ok("CreateTable", &[]);

        let err = orchestrator(&client)
            .create(&desired(&[("name", "orders".into())]))
            .await
            .expect_err("no identifier");

        assert!(matches!(
            err,
            ConvergeError::Reconcile(ReconcileError::MissingIdentifier { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_twice_succeeds() {
        let client = Arc::new(ScriptedClient::new());
        client.ok("DeleteTable", &[]);
        client.on("DeleteTable", Err(ClientError::not_found("DeleteTable", "gone")));
        client.on("DescribeTable", Err(not_found()));
        let orchestrator = orchestrator(&client);
        let id = ResourceIdentifier::new(ARN);

        assert_eq!(orchestrator.delete(&id).await.expect("first delete"), DeleteOutcome::Deleted);
        assert_eq!(
            orchestrator.delete(&id).await.expect("second delete"),
            DeleteOutcome::AlreadyGone
        );
        assert_eq!(client.count("DescribeTable"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_for_disappearance() {
        let client = Arc::new(ScriptedClient::new());
        client.ok("DeleteTable", &[]);
        client.on("DescribeTable", Ok(table("DELETING", &[])));
        client.on("DescribeTable", Ok(table("DELETING", &[])));
        client.on("DescribeTable", Err(not_found()));

        let start = tokio::time::Instant::now();
        orchestrator(&client)
            .delete(&ResourceIdentifier::new(ARN))
            .await
            .expect("delete succeeds");

        // The table type polls deletions every two seconds.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_immutable_drift_issues_no_mutation() {
        let client = Arc::new(ScriptedClient::new());
        client.on("DescribeTable", Ok(table("ACTIVE", &[("name", "orders".into())])));

        let outcome = orchestrator(&client)
            .update(&ResourceIdentifier::new(ARN), &desired(&[("name", "orders-v2".into())]))
            .await
            .expect("update evaluates");

        match outcome {
            UpdateOutcome::ReplacementRequired { attributes, .. } => {
                assert_eq!(attributes, vec![String::from("name")]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.call_names(), vec!["DescribeTable"]);
    }

    #[tokio::test]
    async fn test_immutable_drift_with_mock_client() {
        let mut client = MockRemoteClient::new();
        client
            .expect_invoke()
            .withf(|operation, _| operation.name == "DescribeTable")
            .times(1)
            .returning(|_, _| Ok(table("ACTIVE", &[("key_schema", "id".into())])));

        let orchestrator = Orchestrator::new(Arc::new(client), Arc::new(table_type()), settings());
        let outcome = orchestrator
            .update(
                &ResourceIdentifier::new(ARN),
                &desired(&[("key_schema", "pk".into())]),
            )
            .await
            .expect("update evaluates");

        assert!(matches!(outcome, UpdateOutcome::ReplacementRequired { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_converges_tags_in_place() {
        let client = Arc::new(ScriptedClient::new());
        client.on(
            "DescribeTable",
            Ok(table("ACTIVE", &[("name", "orders".into()), ("tags", tags(&[("team", "web")]))])),
        );
        client.on(
            "DescribeTable",
            Ok(table("ACTIVE", &[("name", "orders".into()), ("tags", tags(&[("team", "data")]))])),
        );
        client.ok("TagResource", &[]);

        let wanted = desired(&[("name", "orders".into()), ("tags", tags(&[("team", "data")]))]);
        let outcome = orchestrator(&client)
            .update(&ResourceIdentifier::new(ARN), &wanted)
            .await
            .expect("update succeeds");

        match outcome {
            UpdateOutcome::Updated { state, calls } => {
                assert_eq!(calls, 1);
                assert_eq!(state.attributes.get("tags"), Some(&tags(&[("team", "data")])));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.count("TagResource"), 1);
    }

    #[tokio::test]
    async fn test_update_in_sync_is_unchanged() {
        let client = Arc::new(ScriptedClient::new());
        client.on(
            "DescribeTable",
            Ok(table("ACTIVE", &[("name", "orders".into()), ("billing_mode", "PROVISIONED".into())])),
        );

        let outcome = orchestrator(&client)
            .update(&ResourceIdentifier::new(ARN), &desired(&[("name", "orders".into())]))
            .await
            .expect("update evaluates");

        assert!(matches!(outcome, UpdateOutcome::Unchanged(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_conflicts_are_retried() {
        let client = Arc::new(ScriptedClient::new());
        client.on("DescribeTable", Ok(table("ACTIVE", &[("read_capacity", AttrValue::Int(5))])));
        client.on("DescribeTable", Ok(table("ACTIVE", &[("read_capacity", AttrValue::Int(10))])));
        client.on(
            "UpdateTable",
            Err(ClientError::Conflict {
                operation: String::from("UpdateTable"),
                message: String::from("table is being updated"),
            }),
        );
        client.ok("UpdateTable", &[]);

        let outcome = orchestrator(&client)
            .update(
                &ResourceIdentifier::new(ARN),
                &desired(&[("read_capacity", AttrValue::Int(10))]),
            )
            .await
            .expect("update succeeds");

        assert!(matches!(outcome, UpdateOutcome::Updated { calls: 1, .. }));
        assert_eq!(client.count("UpdateTable"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_recreates_vanished_resource() {
        let client = Arc::new(ScriptedClient::new());
        client.on("DescribeTable", Err(not_found()));
        client.on("DescribeTable", Ok(table("ACTIVE", &[("name", "orders".into())])));
        client.on("CreateTable", Ok(table("CREATING", &[])));

        let input = DesiredInput::new(desired(&[("name", "orders".into())]))
            .with_previous_id(ResourceIdentifier::new("arn:table/old"));
        let outcome = orchestrator(&client).apply(&input).await.expect("apply succeeds");

        match outcome {
            ApplyOutcome::Recreated { state, previous } => {
                assert_eq!(previous, ResourceIdentifier::new("arn:table/old"));
                assert_eq!(state.id, ResourceIdentifier::new(ARN));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_deletes_before_creating() {
        let client = Arc::new(ScriptedClient::new());
        client.ok("DeleteTable", &[]);
        client.on("DescribeTable", Err(not_found()));
        client.on("DescribeTable", Ok(table("ACTIVE", &[("name", "orders".into())])));
        client.on("CreateTable", Ok(table("CREATING", &[])));

        let state = orchestrator(&client)
            .replace(&ResourceIdentifier::new("arn:table/old"), &desired(&[("name", "orders".into())]))
            .await
            .expect("replace succeeds");

        assert_eq!(state.id, ResourceIdentifier::new(ARN));
        let calls = client.call_names();
        assert_eq!(calls[0], "DeleteTable");
        assert_eq!(calls[1], "DescribeTable");
        assert_eq!(calls[2], "CreateTable");
        assert_eq!(client.count("CreateTable"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_reports_dangling_reference() {
        let client = Arc::new(ScriptedClient::new());
        client.on("DescribeTable", Err(not_found()));

        let state = orchestrator(&client)
            .read(&ResourceIdentifier::new(ARN))
            .await
            .expect("lookup succeeds");
        assert!(state.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_is_reported() {
        let client = Arc::new(ScriptedClient::new());
        client.ok("DeleteTable", &[]);
        client.on("DescribeTable", Ok(table("DELETING", &[])));
        let cancel = CancellationToken::new();
        let orchestrator = orchestrator(&client).with_cancellation(cancel.clone());

        let handle = tokio::spawn(async move {
            orchestrator.delete(&ResourceIdentifier::new(ARN)).await
        });
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();

        let err = handle.await.expect("task panicked").expect_err("cancelled");
        match err {
            ConvergeError::Reconcile(ReconcileError::OperationFailed { source, .. }) => {
                assert!(matches!(*source, ConvergeError::Wait(WaitError::Cancelled { .. })));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
