//! Resource types defined declaratively in configuration.
//!
//! A [`DeclaredResourceType`] turns a `resource_types` entry of
//! `converge.yaml` into a full [`ResourceType`], so new kinds of resources
//! can be managed without writing code.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::client::{AttrValue, Attributes, Operation, OperationKind};
use crate::config::{LookupKind, ResourceTypeConfig};
use crate::planner::DriftRecord;

use super::kind::{
    AttributeSemantics, LifecycleStage, ListLookup, LookupStrategy, MutationCall, ResourceType,
    WaitSpec,
};
use super::types::{DesiredState, RemoteState, ResourceIdentifier, StatusTag};

/// Default response attribute holding list results.
const DEFAULT_COLLECTION_ATTRIBUTE: &str = "items";

/// A resource type described by configuration.
#[derive(Debug, Clone)]
pub struct DeclaredResourceType {
    /// Source definition.
    config: ResourceTypeConfig,
    /// Comparison rules derived from the definition.
    semantics: AttributeSemantics,
}

impl DeclaredResourceType {
    /// Builds a resource type from its definition.
    #[must_use]
    pub fn new(config: ResourceTypeConfig) -> Self {
        let semantics = Self::derive_semantics(&config);
        Self { config, semantics }
    }

    /// Returns the source definition.
    #[must_use]
    pub const fn config(&self) -> &ResourceTypeConfig {
        &self.config
    }

    fn derive_semantics(config: &ResourceTypeConfig) -> AttributeSemantics {
        let mut semantics = config.attributes.clone();

        semantics.computed.insert(config.identifier.attribute.clone());
        semantics.computed.insert(config.status.attribute.clone());
        if let Some(reason) = &config.status.reason_attribute {
            semantics.computed.insert(reason.clone());
        }

        // Without a catch-all update call only grouped attributes change in place.
        if semantics.updatable.is_none() && config.operations.update.is_none() {
            let mut updatable: BTreeSet<String> = config
                .update_groups
                .iter()
                .filter(|g| g.operation.is_some())
                .flat_map(|g| g.attributes.iter().cloned())
                .collect();
            updatable.extend(
                config
                    .post_create
                    .iter()
                    .flat_map(|step| step.attributes.iter().cloned()),
            );
            if let Some(tags) = Self::managed_tags(config) {
                updatable.insert(tags.to_string());
            }
            semantics.updatable = Some(updatable);
        }

        semantics
    }

    /// Tag attribute, if tags are converged through dedicated calls.
    fn managed_tags(config: &ResourceTypeConfig) -> Option<&str> {
        match (&config.tags, &config.operations.tag) {
            (Some(tags), Some(_)) => Some(tags.attribute.as_str()),
            _ => None,
        }
    }

    fn operation(kind: OperationKind, name: &str) -> Operation {
        Operation::new(kind, name)
    }

    /// Looks up an attribute, inside the response envelope first.
    fn lookup_attribute<'a>(&self, response: &'a Attributes, name: &str) -> Option<&'a AttrValue> {
        self.config
            .response_key
            .as_ref()
            .and_then(|key| response.get(key))
            .and_then(AttrValue::as_map)
            .and_then(|inner| inner.get(name))
            .or_else(|| response.get(name))
    }

    fn map_status(&self, raw: &str) -> StatusTag {
        if let Some(tag) = self.config.status.map.get(raw) {
            return tag.clone();
        }
        self.config
            .status
            .map
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(raw))
            .map_or_else(|| StatusTag::parse(raw), |(_, tag)| tag.clone())
    }

    fn tag_calls(&self, id: &ResourceIdentifier, drift: &DriftRecord, desired: &DesiredState) -> Vec<MutationCall> {
        let Some(tags) = self.config.tags.as_ref().filter(|_| Self::managed_tags(&self.config).is_some()) else {
            return Vec::new();
        };
        let Some(change) = drift.get(&tags.attribute) else {
            return Vec::new();
        };

        let empty = Attributes::new();
        let wanted = desired
            .get(&tags.attribute)
            .and_then(AttrValue::as_map)
            .unwrap_or(&empty);
        let current = change
            .remote
            .as_ref()
            .and_then(AttrValue::as_map)
            .unwrap_or(&empty);

        let mut calls = Vec::new();

        let removed: Vec<AttrValue> = current
            .keys()
            .filter(|key| !wanted.contains_key(*key))
            .map(|key| AttrValue::from(key.as_str()))
            .collect();
        if let (Some(untag), false) = (&self.config.operations.untag, removed.is_empty()) {
            let mut request = self.identity_request(id);
            request.insert(tags.keys_parameter.clone(), AttrValue::List(removed));
            calls.push(MutationCall {
                step: String::from("untag"),
                operation: Self::operation(OperationKind::Untag, untag),
                request,
                attributes: vec![tags.attribute.clone()],
                requires_stable: false,
            });
        }

        let upserted: Attributes = wanted
            .iter()
            .filter(|(key, value)| current.get(*key) != Some(*value))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let (Some(tag), false) = (&self.config.operations.tag, upserted.is_empty()) {
            let mut request = self.identity_request(id);
            request.insert(tags.parameter.clone(), AttrValue::Map(upserted));
            calls.push(MutationCall {
                step: String::from("tag"),
                operation: Self::operation(OperationKind::Tag, tag),
                request,
                attributes: vec![tags.attribute.clone()],
                requires_stable: false,
            });
        }

        calls
    }

    /// Builds one update call covering `attributes`.
    fn update_call(
        &self,
        id: &ResourceIdentifier,
        step: &str,
        operation: Operation,
        attributes: &[String],
        desired: &DesiredState,
    ) -> MutationCall {
        let mut request = self.identity_request(id);
        let mut unset = Vec::new();

        for name in attributes {
            match desired.get(name) {
                Some(value) => {
                    request.insert(name.clone(), value.clone());
                }
                None => unset.push(AttrValue::from(name.as_str())),
            }
        }
        if !unset.is_empty() {
            request.insert(self.config.unset_parameter.clone(), AttrValue::List(unset));
        }

        MutationCall {
            step: step.to_string(),
            operation,
            request,
            attributes: attributes.to_vec(),
            requires_stable: true,
        }
    }
}

impl ResourceType for DeclaredResourceType {
    fn type_name(&self) -> &str {
        &self.config.name
    }

    fn create_operation(&self) -> Operation {
        Self::operation(OperationKind::Create, &self.config.operations.create)
    }

    fn describe_operation(&self) -> Operation {
        Self::operation(OperationKind::Describe, &self.config.operations.describe)
    }

    fn delete_operation(&self) -> Operation {
        Self::operation(OperationKind::Delete, &self.config.operations.delete)
    }

    fn build_create_request(&self, desired: &DesiredState, client_token: &str) -> Attributes {
        let mut deferred: BTreeSet<&str> = self
            .config
            .post_create
            .iter()
            .flat_map(|step| step.attributes.iter().map(String::as_str))
            .collect();
        if let Some(tags) = Self::managed_tags(&self.config) {
            deferred.insert(tags);
        }

        let mut request: Attributes = desired
            .attributes()
            .iter()
            .filter(|(name, _)| !deferred.contains(name.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(parameter) = &self.config.client_token_parameter {
            request.insert(parameter.clone(), AttrValue::from(client_token));
        }

        request
    }

    fn identifier_from_response(&self, response: &Attributes) -> Option<ResourceIdentifier> {
        match self.lookup_attribute(response, &self.config.identifier.attribute)? {
            AttrValue::String(id) if !id.is_empty() => Some(ResourceIdentifier::new(id.clone())),
            AttrValue::Int(id) => Some(ResourceIdentifier::new(id.to_string())),
            _ => None,
        }
    }

    fn identity_request(&self, id: &ResourceIdentifier) -> Attributes {
        let mut request = Attributes::new();
        request.insert(
            self.config.id_parameter().to_string(),
            AttrValue::from(id.as_str()),
        );
        request
    }

    fn unwrap_response(&self, response: Attributes) -> Attributes {
        let Some(key) = &self.config.response_key else {
            return response;
        };
        match response.get(key) {
            Some(AttrValue::Map(inner)) => inner.clone(),
            _ => response,
        }
    }

    fn status_of(&self, remote: &Attributes) -> StatusTag {
        match remote.get(&self.config.status.attribute) {
            Some(AttrValue::String(raw)) => self.map_status(raw),
            Some(other) => self.map_status(&other.to_string()),
            // Resources without a status field are usable as soon as they exist.
            None => StatusTag::Available,
        }
    }

    fn status_reason(&self, remote: &Attributes) -> Option<String> {
        let name = self.config.status.reason_attribute.as_ref()?;
        match remote.get(name)? {
            AttrValue::String(reason) => Some(reason.clone()),
            other => Some(other.to_string()),
        }
    }

    fn map_remote_to_local(&self, remote: &RemoteState) -> Attributes {
        let status = &self.config.status;
        remote
            .attributes()
            .iter()
            .filter(|(name, _)| {
                **name != status.attribute && status.reason_attribute.as_ref() != Some(*name)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn semantics(&self) -> &AttributeSemantics {
        &self.semantics
    }

    fn update_calls(
        &self,
        id: &ResourceIdentifier,
        drift: &DriftRecord,
        desired: &DesiredState,
    ) -> Vec<MutationCall> {
        let tags_attribute = Self::managed_tags(&self.config);
        let mut pending: BTreeSet<String> = drift
            .mutable_attributes()
            .into_iter()
            .filter(|name| Some(*name) != tags_attribute)
            .map(String::from)
            .collect();

        let mut calls = Vec::new();

        let default_update = self.config.operations.update.as_deref();
        for group in &self.config.update_groups {
            if !group.attributes.iter().any(|a| pending.contains(a)) {
                continue;
            }
            let Some(name) = group.operation.as_deref().or(default_update) else {
                continue;
            };
            calls.push(self.update_call(
                id,
                name,
                Self::operation(OperationKind::Update, name),
                &group.attributes,
                desired,
            ));
            for attribute in &group.attributes {
                pending.remove(attribute);
            }
        }

        for step in &self.config.post_create {
            if !step.attributes.iter().any(|a| pending.contains(a)) {
                continue;
            }
            calls.push(self.update_call(
                id,
                &step.name,
                Self::operation(OperationKind::Update, &step.operation),
                &step.attributes,
                desired,
            ));
            for attribute in &step.attributes {
                pending.remove(attribute);
            }
        }

        if let (Some(name), false) = (default_update, pending.is_empty()) {
            let remaining: Vec<String> = pending.into_iter().collect();
            calls.push(self.update_call(
                id,
                "update",
                Self::operation(OperationKind::Update, name),
                &remaining,
                desired,
            ));
        }

        calls.extend(self.tag_calls(id, drift, desired));
        calls
    }

    fn post_create_steps(&self, id: &ResourceIdentifier, desired: &DesiredState) -> Vec<MutationCall> {
        let mut steps = Vec::new();

        if let (Some(tags), Some(tag)) = (&self.config.tags, &self.config.operations.tag) {
            if let Some(AttrValue::Map(wanted)) = desired.get(&tags.attribute) {
                if !wanted.is_empty() {
                    let mut request = self.identity_request(id);
                    request.insert(tags.parameter.clone(), AttrValue::Map(wanted.clone()));
                    steps.push(MutationCall {
                        step: String::from("tag"),
                        operation: Self::operation(OperationKind::Tag, tag),
                        request,
                        attributes: vec![tags.attribute.clone()],
                        requires_stable: false,
                    });
                }
            }
        }

        for step in &self.config.post_create {
            if !step.attributes.iter().any(|a| desired.get(a).is_some()) {
                continue;
            }
            let mut request = self.identity_request(id);
            for name in &step.attributes {
                if let Some(value) = desired.get(name) {
                    request.insert(name.clone(), value.clone());
                }
            }
            steps.push(MutationCall {
                step: step.name.clone(),
                operation: Self::operation(OperationKind::Update, &step.operation),
                request,
                attributes: step.attributes.clone(),
                requires_stable: true,
            });
        }

        steps
    }

    fn wait_spec(&self, stage: LifecycleStage) -> WaitSpec {
        let mut spec = WaitSpec::default_for(stage);
        if let Some(stage) = self.config.stage(stage) {
            if !stage.target.is_empty() {
                spec.target.clone_from(&stage.target);
            }
            if !stage.failure.is_empty() {
                spec.failure.clone_from(&stage.failure);
            }
            spec.timeout = stage
                .timeout_minutes
                .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)));
            spec.poll_interval = stage.interval_secs.map(Duration::from_secs);
        }
        spec
    }

    fn lookup(&self) -> LookupStrategy {
        let lookup = &self.config.lookup;
        match (lookup.strategy, &self.config.operations.list) {
            (LookupKind::List, Some(list)) => LookupStrategy::List(ListLookup {
                operation: Self::operation(OperationKind::List, list),
                match_attribute: lookup
                    .match_attribute
                    .clone()
                    .unwrap_or_else(|| self.config.identifier.attribute.clone()),
                collection_attribute: lookup
                    .collection_attribute
                    .clone()
                    .unwrap_or_else(|| String::from(DEFAULT_COLLECTION_ATTRIBUTE)),
                page_token: lookup.page_token.clone(),
            }),
            _ => LookupStrategy::Direct,
        }
    }
}
