//! List-then-filter lookup for resources without a describe-by-id call.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{AttrValue, Attributes, SharedClient};
use crate::error::{ConvergeError, ReconcileError, Result};
use crate::resource::{ListLookup, RemoteState, ResourceIdentifier, ResourceType};

use super::finder::{Finder, Lookup};

/// Upper bound on pages followed for a single lookup.
const MAX_PAGES: usize = 1000;

/// Finder that lists resources and filters on an identifying attribute.
///
/// A lookup must identify at most one resource; several matches are an
/// error rather than an arbitrary pick. A listing that stops before its
/// last page is an error too, never a "not found".
#[derive(Debug, Clone)]
pub struct ListFinder {
    client: SharedClient,
    resource: Arc<dyn ResourceType>,
    lookup: ListLookup,
}

impl ListFinder {
    /// Creates a list-then-filter finder.
    #[must_use]
    pub fn new(client: SharedClient, resource: Arc<dyn ResourceType>, lookup: ListLookup) -> Self {
        Self {
            client,
            resource,
            lookup,
        }
    }

    fn matches(&self, item: &Attributes, id: &ResourceIdentifier) -> bool {
        match item.get(&self.lookup.match_attribute) {
            Some(AttrValue::String(value)) => value == id.as_str(),
            Some(AttrValue::Int(value)) => value.to_string() == id.as_str(),
            _ => false,
        }
    }

    fn incomplete(&self, id: &ResourceIdentifier, pages: usize, reason: String) -> ConvergeError {
        ReconcileError::LookupIncomplete {
            resource_type: self.resource.type_name().to_string(),
            value: id.to_string(),
            pages,
            reason,
        }
        .into()
    }

    fn next_token(&self, response: &Attributes) -> Option<String> {
        let name = self.lookup.page_token.as_ref()?;
        response
            .get(name)
            .and_then(AttrValue::as_str)
            .filter(|token| !token.is_empty())
            .map(String::from)
    }
}

#[async_trait]
impl Finder for ListFinder {
    async fn find(&self, id: &ResourceIdentifier) -> Result<Lookup> {
        let mut matches: Vec<Attributes> = Vec::new();
        let mut token: Option<String> = None;
        let mut seen: HashSet<String> = HashSet::new();
        let mut pages = 0;

        loop {
            if pages == MAX_PAGES {
                warn!("Stopped listing after {MAX_PAGES} pages looking for {id}");
                return Err(self.incomplete(id, pages, format!("page limit of {MAX_PAGES} reached")));
            }

            let mut request = Attributes::new();
            if let (Some(name), Some(value)) = (&self.lookup.page_token, &token) {
                request.insert(name.clone(), AttrValue::from(value.as_str()));
            }

            let response = self
                .client
                .invoke(&self.lookup.operation, request)
                .await?;
            pages += 1;

            if let Some(items) = response
                .get(&self.lookup.collection_attribute)
                .and_then(AttrValue::as_list)
            {
                matches.extend(
                    items
                        .iter()
                        .filter_map(AttrValue::as_map)
                        .filter(|item| self.matches(item, id))
                        .cloned(),
                );
            }

            let Some(next) = self.next_token(&response) else {
                debug!("Listed {pages} page(s) looking for {id}");
                break;
            };
            if !seen.insert(next.clone()) {
                warn!("Page token {next} repeated while listing for {id}");
                return Err(self.incomplete(id, pages, format!("page token '{next}' repeated")));
            }
            token = Some(next);
        }

        match matches.len() {
            0 => Ok(Lookup::NotFound),
            1 => {
                let item = matches.remove(0);
                let status = self.resource.status_of(&item);
                Ok(RemoteState::new(id.clone(), status, item).map_or(Lookup::NotFound, Lookup::Found))
            }
            count => Err(ReconcileError::AmbiguousLookup {
                resource_type: self.resource.type_name().to_string(),
                attribute: self.lookup.match_attribute.clone(),
                value: id.to_string(),
                matches: count,
            }
            .into()),
        }
    }
}
