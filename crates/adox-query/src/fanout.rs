//! Cross-scope lookups
//!
//! The upstream API has no query spanning pools or queues, so the same lookup
//! is issued once per scope and the results are merged. A failing scope is
//! skipped and reported, never fatal: a token commonly lacks access to some
//! pools, and the rest of the organization is still worth returning.
//!
//! Lookups run concurrently up to `max_concurrency`, but results are consumed
//! in scope order, so merging and warnings are identical to a sequential run.

use adox_core::{
    classify, AdoxError, Agent, AgentStatus, ClassifiedError, ErrorKind, OperationContext,
    ScopedResourceRef,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, warn};

/// A record that can be merged across scopes
pub trait ScopedRecord {
    /// Identity, unique within the pool that owns the record
    fn identity(&self) -> i64;

    fn display_name(&self) -> &str;

    fn status_label(&self) -> Option<String> {
        None
    }
}

impl ScopedRecord for Agent {
    fn identity(&self) -> i64 {
        self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn status_label(&self) -> Option<String> {
        Some(self.status.to_string())
    }
}

/// A merged record with the scope it was first found in
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRecord<T> {
    #[serde(flatten)]
    pub record: T,
    pub found_in: ScopedResourceRef,
}

/// A scope whose lookup failed and was left out of the result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedScope {
    pub scope: ScopedResourceRef,
    pub kind: ErrorKind,
    pub message: String,
}

/// Merged outcome of one fan-out
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutResult<T> {
    pub records: Vec<AggregatedRecord<T>>,
    pub scopes_searched: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_scopes: Vec<SkippedScope>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> FanOutResult<T> {
    /// Names of scopes skipped for lack of permission
    pub fn inaccessible_scopes(&self) -> Vec<&str> {
        self.skipped_scopes
            .iter()
            .filter(|s| s.kind == ErrorKind::Permission)
            .map(|s| s.scope.resource_name.as_str())
            .collect()
    }
}

/// Post-merge filters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Case-insensitive substring of the display name
    pub name_contains: Option<String>,
    /// Case-insensitive exact display name
    pub name_equals: Option<String>,
    /// Case-insensitive status equality
    pub status: Option<String>,
}

impl RecordFilter {
    pub fn matches<T: ScopedRecord>(&self, record: &T) -> bool {
        let name = record.display_name().to_lowercase();

        if let Some(needle) = &self.name_contains {
            if !name.contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(exact) = &self.name_equals {
            if name != exact.to_lowercase() {
                return false;
            }
        }
        if let Some(status) = &self.status {
            match record.status_label() {
                Some(label) if label.eq_ignore_ascii_case(status) => {}
                _ => return false,
            }
        }
        true
    }

    /// Validate the status filter against known agent states
    pub fn for_agents(
        name_contains: Option<String>,
        status: Option<String>,
    ) -> adox_core::Result<Self> {
        if let Some(status) = &status {
            status
                .parse::<AgentStatus>()
                .map_err(AdoxError::InvalidArgument)?;
        }
        Ok(Self {
            name_contains,
            name_equals: None,
            status,
        })
    }
}

/// Keep scopes whose name contains `name_contains` (case-insensitive)
pub fn filter_scopes(
    scopes: Vec<ScopedResourceRef>,
    name_contains: Option<&str>,
) -> Vec<ScopedResourceRef> {
    match name_contains {
        None => scopes,
        Some(needle) => {
            let needle = needle.to_lowercase();
            scopes
                .into_iter()
                .filter(|s| s.resource_name.to_lowercase().contains(&needle))
                .collect()
        }
    }
}

/// Pool that owns records found in `scope`: the parent pool of a queue, or the scope itself
fn owner_id(scope: &ScopedResourceRef) -> i64 {
    scope
        .parent_ref
        .as_ref()
        .map_or(scope.resource_id, |parent| parent.resource_id)
}

/// Runs one lookup per scope and merges the results
#[derive(Debug, Clone)]
pub struct FanOut {
    max_concurrency: usize,
    op: OperationContext,
    /// Human name of a scope in messages, e.g. "pool"
    scope_label: &'static str,
}

impl FanOut {
    pub fn new(op: OperationContext, scope_label: &'static str, max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            op,
            scope_label,
        }
    }

    /// Union of records across every scope, filtered and sorted by name
    pub async fn collect<T, F, Fut>(
        &self,
        scopes: Vec<ScopedResourceRef>,
        filter: &RecordFilter,
        lookup: F,
    ) -> FanOutResult<T>
    where
        T: ScopedRecord,
        F: Fn(ScopedResourceRef) -> Fut,
        Fut: Future<Output = adox_core::Result<Vec<T>>>,
    {
        let scopes_searched = scopes.len();
        debug!(
            operation = self.op.name,
            scopes = scopes_searched,
            concurrency = self.max_concurrency,
            "Fanning out over {}s",
            self.scope_label
        );

        let lookup = &lookup;
        let outcomes: Vec<(ScopedResourceRef, adox_core::Result<Vec<T>>)> = stream::iter(scopes)
            .map(|scope| async move {
                let result = lookup(scope.clone()).await;
                (scope, result)
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut order: Vec<(i64, i64)> = Vec::new();
        let mut merged: HashMap<(i64, i64), AggregatedRecord<T>> = HashMap::new();
        let mut skipped = Vec::new();

        for (scope, result) in outcomes {
            match result {
                Ok(records) => {
                    let owner = owner_id(&scope);
                    for record in records {
                        let key = (owner, record.identity());
                        if merged.contains_key(&key) {
                            continue;
                        }
                        order.push(key);
                        merged.insert(
                            key,
                            AggregatedRecord {
                                record,
                                found_in: scope.clone(),
                            },
                        );
                    }
                }
                Err(err) => skipped.push(self.skip(scope, &err)),
            }
        }

        let mut records: Vec<AggregatedRecord<T>> = order
            .into_iter()
            .filter_map(|key| merged.remove(&key))
            .filter(|r| filter.matches(&r.record))
            .collect();

        records.sort_by(|a, b| {
            a.record
                .display_name()
                .to_lowercase()
                .cmp(&b.record.display_name().to_lowercase())
                .then_with(|| a.record.identity().cmp(&b.record.identity()))
        });

        let warnings = self.warnings(&skipped);

        FanOutResult {
            records,
            scopes_searched,
            skipped_scopes: skipped,
            warnings,
        }
    }

    /// Records named exactly `name` in any scope
    ///
    /// Fails with `NotFound` when nothing matches, whatever the individual
    /// scopes returned; the message mentions scopes that could not be searched.
    pub async fn find<T, F, Fut>(
        &self,
        name: &str,
        scopes: Vec<ScopedResourceRef>,
        lookup: F,
    ) -> Result<FanOutResult<T>, ClassifiedError>
    where
        T: ScopedRecord,
        F: Fn(ScopedResourceRef) -> Fut,
        Fut: Future<Output = adox_core::Result<Vec<T>>>,
    {
        let filter = RecordFilter {
            name_equals: Some(name.to_string()),
            ..Default::default()
        };
        let result = self.collect(scopes, &filter, lookup).await;

        if !result.records.is_empty() {
            return Ok(result);
        }

        let mut message = format!(
            "'{}' was not found in any of the {} {}(s) searched",
            name, result.scopes_searched, self.scope_label
        );
        if !result.skipped_scopes.is_empty() {
            let names: Vec<&str> = result
                .skipped_scopes
                .iter()
                .map(|s| s.scope.resource_name.as_str())
                .collect();
            message.push_str(&format!(
                "; {} {}(s) could not be searched ({}), it may exist in a {} your token cannot see",
                names.len(),
                self.scope_label,
                names.join(", "),
                self.scope_label
            ));
        }

        Err(ClassifiedError::not_found(message))
    }

    fn skip(&self, scope: ScopedResourceRef, err: &AdoxError) -> SkippedScope {
        let classified = classify(err, &self.op, &format!("{} {}", self.scope_label, scope));
        warn!(
            operation = self.op.name,
            kind = %classified.kind,
            "Skipping {} {}: {}",
            self.scope_label,
            scope,
            classified.message
        );
        SkippedScope {
            scope,
            kind: classified.kind,
            message: classified.message,
        }
    }

    fn warnings(&self, skipped: &[SkippedScope]) -> Vec<String> {
        let (denied, failed): (Vec<&SkippedScope>, Vec<&SkippedScope>) = skipped
            .iter()
            .partition(|s| s.kind == ErrorKind::Permission);

        let mut warnings = Vec::new();
        if !denied.is_empty() {
            let names: Vec<&str> = denied.iter().map(|s| s.scope.resource_name.as_str()).collect();
            warnings.push(format!(
                "Skipped {} {}(s) due to insufficient permissions ({} required): {}",
                names.len(),
                self.scope_label,
                self.op.required_capability,
                names.join(", ")
            ));
        }
        if !failed.is_empty() {
            let names: Vec<&str> = failed.iter().map(|s| s.scope.resource_name.as_str()).collect();
            warnings.push(format!(
                "Skipped {} {}(s) after errors: {}",
                names.len(),
                self.scope_label,
                names.join(", ")
            ));
        }
        warnings
    }
}
