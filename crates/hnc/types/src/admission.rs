//! Admission review types
//!
//! These mirror the platform's `AdmissionReview` wire format closely enough
//! that the same structures serve the HTTP webhooks and the in-process chain.

use crate::resource::GroupResource;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// The identity making a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

impl UserInfo {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub resource: GroupResource,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: String,
    pub operation: Operation,
    #[serde(default)]
    pub user_info: UserInfo,
    /// New state; absent on delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    /// Prior state; absent on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    #[serde(default)]
    pub dry_run: bool,
}

impl AdmissionRequest {
    /// Decodes the new object, or the old object on delete
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<Option<T>> {
        let raw = match self.operation {
            Operation::Delete => self.old_object.as_ref(),
            _ => self.object.as_ref(),
        };
        raw.map(|v| serde_json::from_value(v.clone())).transpose()
    }

    pub fn decode_old<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<Option<T>> {
        self.old_object
            .as_ref()
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
    }
}

/// Why a request was refused; rendered as the status reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenialReason {
    Forbidden,
    Invalid,
    Conflict,
    BadRequest,
    InternalError,
    ServiceUnavailable,
}

impl DenialReason {
    /// HTTP-style status code carried alongside the reason
    pub fn code(&self) -> u16 {
        match self {
            DenialReason::Forbidden => 403,
            DenialReason::Invalid => 422,
            DenialReason::Conflict => 409,
            DenialReason::BadRequest => 400,
            DenialReason::InternalError => 500,
            DenialReason::ServiceUnavailable => 503,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStatus {
    pub code: u16,
    pub reason: DenialReason,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Base64-encoded JSON patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

impl AdmissionResponse {
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            status: None,
            warnings: Vec::new(),
            patch: None,
            patch_type: None,
        }
    }

    pub fn deny(uid: impl Into<String>, reason: DenialReason, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(AdmissionStatus {
                code: reason.code(),
                reason,
                message: message.into(),
            }),
            warnings: Vec::new(),
            patch: None,
            patch_type: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Attaches a JSON patch; an empty list leaves the response unpatched
    pub fn with_patch(mut self, ops: &[PatchOperation]) -> serde_json::Result<Self> {
        if ops.is_empty() {
            return Ok(self);
        }
        let raw = serde_json::to_vec(ops)?;
        self.patch = Some(base64::engine::general_purpose::STANDARD.encode(raw));
        self.patch_type = Some("JSONPatch".to_string());
        Ok(self)
    }

    /// Decodes the attached patch, if any
    pub fn patch_operations(&self) -> Result<Vec<PatchOperation>, PatchError> {
        let Some(encoded) = &self.patch else {
            return Ok(Vec::new());
        };
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| PatchError::Decode(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| PatchError::Decode(e.to_string()))
    }

    pub fn message(&self) -> Option<&str> {
        self.status.as_ref().map(|s| s.message.as_str())
    }
}

/// Envelope exchanged with webhook endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default = "default_review_api_version")]
    pub api_version: String,
    #[serde(default = "default_review_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

fn default_review_api_version() -> String {
    "admission.k8s.io/v1".to_string()
}

fn default_review_kind() -> String {
    "AdmissionReview".to_string()
}

impl AdmissionReview {
    pub fn request(request: AdmissionRequest) -> Self {
        Self {
            api_version: default_review_api_version(),
            kind: default_review_kind(),
            request: Some(request),
            response: None,
        }
    }

    pub fn response(response: AdmissionResponse) -> Self {
        Self {
            api_version: default_review_api_version(),
            kind: default_review_kind(),
            request: None,
            response: Some(response),
        }
    }
}

// ========== JSON patch ==========

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch path not found: {0}")]
    PathNotFound(String),

    #[error("invalid patch path: {0}")]
    InvalidPath(String),

    #[error("failed to decode patch: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// One RFC 6902 operation; only object members are addressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }

    /// Escapes a map key for use as a pointer segment
    pub fn escape(segment: &str) -> String {
        segment.replace('~', "~0").replace('/', "~1")
    }

    pub fn apply(&self, target: &mut Value) -> Result<(), PatchError> {
        let segments: Vec<String> = self
            .path
            .strip_prefix('/')
            .ok_or_else(|| PatchError::InvalidPath(self.path.clone()))?
            .split('/')
            .map(|s| s.replace("~1", "/").replace("~0", "~"))
            .collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| PatchError::InvalidPath(self.path.clone()))?;

        let mut cursor = target;
        for segment in parents {
            cursor = cursor
                .as_object_mut()
                .and_then(|m| m.get_mut(segment))
                .ok_or_else(|| PatchError::PathNotFound(self.path.clone()))?;
        }
        let parent = cursor
            .as_object_mut()
            .ok_or_else(|| PatchError::PathNotFound(self.path.clone()))?;

        match self.op {
            PatchOp::Add => {
                parent.insert(last.clone(), self.value.clone().unwrap_or(Value::Null));
            }
            PatchOp::Replace => {
                if !parent.contains_key(last) {
                    return Err(PatchError::PathNotFound(self.path.clone()));
                }
                parent.insert(last.clone(), self.value.clone().unwrap_or(Value::Null));
            }
            PatchOp::Remove => {
                parent
                    .remove(last)
                    .ok_or_else(|| PatchError::PathNotFound(self.path.clone()))?;
            }
        }
        Ok(())
    }
}

/// Applies a sequence of operations in order
pub fn apply_patch(target: &mut Value, ops: &[PatchOperation]) -> Result<(), PatchError> {
    ops.iter().try_for_each(|op| op.apply(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_escaped_label_key() {
        let mut obj = json!({ "metadata": { "name": "a", "labels": {} } });
        let path = format!(
            "/metadata/labels/{}",
            PatchOperation::escape("hnc.x-k8s.io/included-namespace")
        );
        apply_patch(&mut obj, &[PatchOperation::add(path, json!("true"))]).unwrap();
        assert_eq!(
            obj["metadata"]["labels"]["hnc.x-k8s.io/included-namespace"],
            "true"
        );
    }

    #[test]
    fn test_patch_missing_parent() {
        let mut obj = json!({ "metadata": { "name": "a" } });
        let err = PatchOperation::add("/metadata/labels/x", json!("y"))
            .apply(&mut obj)
            .unwrap_err();
        assert!(matches!(err, PatchError::PathNotFound(_)));
    }

    #[test]
    fn test_response_patch_encoding() {
        let ops = vec![PatchOperation::remove("/metadata/labels/a")];
        let resp = AdmissionResponse::allow("1").with_patch(&ops).unwrap();
        assert_eq!(resp.patch_type.as_deref(), Some("JSONPatch"));
        assert_eq!(resp.patch_operations().unwrap(), ops);
    }

    #[test]
    fn test_denial_carries_reason() {
        let resp = AdmissionResponse::deny("1", DenialReason::Forbidden, "no");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["status"]["reason"], "Forbidden");
        assert_eq!(json["status"]["code"], 403);
    }
}
