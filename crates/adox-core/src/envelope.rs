//! Result envelope and error classification
//!
//! Every public operation returns an [`Envelope`]. Raw failures are mapped
//! into the closed [`ErrorKind`] taxonomy by [`classify`] exactly once, at the
//! operation boundary.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AdoxError;

/// Closed set of failure kinds visible to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Permission,
    NotFound,
    ApiError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Permission => write!(f, "permission"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::ApiError => write!(f, "api_error"),
        }
    }
}

/// A failure normalized for the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_hint: Option<String>,
}

impl ClassifiedError {
    pub fn permission(message: impl Into<String>, capability: &str) -> Self {
        Self {
            kind: ErrorKind::Permission,
            message: message.into(),
            required_capability: Some(capability.to_string()),
            remediation_hint: Some(format!(
                "Use a personal access token that includes the '{}' scope, \
                 and make sure your account has access to the resource.",
                capability
            )),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
            required_capability: None,
            remediation_hint: None,
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ApiError,
            message: message.into(),
            required_capability: None,
            remediation_hint: None,
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(hint) = &self.remediation_hint {
            write!(f, " ({})", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for ClassifiedError {}

/// Static facts about one named operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationContext {
    pub name: &'static str,
    /// Token scope needed to call this operation
    pub required_capability: &'static str,
}

impl OperationContext {
    pub const fn new(name: &'static str, required_capability: &'static str) -> Self {
        Self {
            name,
            required_capability,
        }
    }
}

/// Map a raw failure into the closed taxonomy
///
/// `resource` is the identity the caller supplied, quoted in not-found messages.
pub fn classify(err: &AdoxError, op: &OperationContext, resource: &str) -> ClassifiedError {
    match err.status() {
        Some(401) | Some(403) => ClassifiedError::permission(
            format!(
                "{} was denied access to {}: {}",
                op.name,
                resource,
                err.raw_message()
            ),
            op.required_capability,
        ),
        Some(404) => {
            let detail = err.raw_message();
            let message = if detail.contains(resource) || resource.is_empty() {
                detail
            } else {
                format!("{} not found: {}", resource, detail)
            };
            ClassifiedError::not_found(message)
        }
        _ => ClassifiedError::api(err.raw_message()),
    }
}

/// Uniform success/failure wrapper returned by every operation
///
/// Serializes as `{"ok": true, "value": ...}` or `{"ok": false, "error": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    Ok(T),
    Err(ClassifiedError),
}

impl<T> Envelope<T> {
    /// Wrap a raw result, classifying the failure if there is one
    pub fn from_result(
        result: crate::Result<T>,
        op: &OperationContext,
        resource: &str,
    ) -> Self {
        match result {
            Ok(value) => Envelope::Ok(value),
            Err(err) => {
                let classified = classify(&err, op, resource);
                tracing::debug!(
                    operation = op.name,
                    kind = %classified.kind,
                    "Operation failed: {}",
                    err
                );
                Envelope::Err(classified)
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Ok(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Envelope::Ok(value) => Some(value),
            Envelope::Err(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ClassifiedError> {
        match self {
            Envelope::Ok(_) => None,
            Envelope::Err(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<T, ClassifiedError> {
        match self {
            Envelope::Ok(value) => Ok(value),
            Envelope::Err(err) => Err(err),
        }
    }
}

impl<T> From<Result<T, ClassifiedError>> for Envelope<T> {
    fn from(result: Result<T, ClassifiedError>) -> Self {
        match result {
            Ok(value) => Envelope::Ok(value),
            Err(err) => Envelope::Err(err),
        }
    }
}

impl<T: Serialize> Serialize for Envelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Envelope", 2)?;
        match self {
            Envelope::Ok(value) => {
                state.serialize_field("ok", &true)?;
                state.serialize_field("value", value)?;
            }
            Envelope::Err(err) => {
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", err)?;
            }
        }
        state.end()
    }
}

#[derive(Deserialize)]
struct RawEnvelope<T> {
    ok: bool,
    value: Option<T>,
    error: Option<ClassifiedError>,
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Envelope<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEnvelope::<T>::deserialize(deserializer)?;
        match (raw.ok, raw.value, raw.error) {
            (true, Some(value), None) => Ok(Envelope::Ok(value)),
            (false, None, Some(err)) => Ok(Envelope::Err(err)),
            _ => Err(de::Error::custom(
                "envelope must carry exactly one of `value` (ok = true) or `error` (ok = false)",
            )),
        }
    }
}
