//! In-process admission: hooks consulted before every write
//!
//! Mutating hooks run first and may patch the object; validating hooks then
//! see the patched object. A validator that does not answer within the
//! timeout denies the request, a mutator that times out is skipped.

use async_trait::async_trait;
use hnc_types::admission::{apply_patch, AdmissionRequest, AdmissionResponse, DenialReason};
use hnc_types::GroupResource;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-request deadline for a hook
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait AdmissionHook: Send + Sync {
    fn name(&self) -> &str;

    /// Mutators may patch; validators only allow or deny
    fn is_mutating(&self) -> bool {
        false
    }

    /// Does this hook govern the resource?
    fn handles(&self, resource: &GroupResource) -> bool;

    async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse;
}

/// Outcome of running the whole chain
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    /// Admitted; carries the possibly patched object and any warnings
    Allowed {
        object: Option<serde_json::Value>,
        warnings: Vec<String>,
    },
    Denied {
        reason: DenialReason,
        message: String,
    },
}

/// Runs every relevant hook for a request
pub async fn run_hooks(
    hooks: &[Arc<dyn AdmissionHook>],
    mut request: AdmissionRequest,
    timeout: Duration,
) -> AdmissionOutcome {
    let mut warnings = Vec::new();

    let (mutators, validators): (Vec<_>, Vec<_>) = hooks
        .iter()
        .filter(|h| h.handles(&request.resource))
        .partition(|h| h.is_mutating());

    for hook in mutators {
        let response = match tokio::time::timeout(timeout, hook.review(&request)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(hook = hook.name(), "Mutating hook timed out; continuing");
                continue;
            }
        };
        if !response.allowed {
            return denial(hook.name(), response);
        }
        warnings.extend(response.warnings.iter().cloned());
        let ops = match response.patch_operations() {
            Ok(ops) => ops,
            Err(e) => {
                warn!(hook = hook.name(), error = %e, "Ignoring undecodable patch");
                continue;
            }
        };
        if let (Some(object), false) = (request.object.as_mut(), ops.is_empty()) {
            let mut patched = object.clone();
            match apply_patch(&mut patched, &ops) {
                Ok(()) => *object = patched,
                Err(e) => warn!(hook = hook.name(), error = %e, "Failed to apply patch"),
            }
        }
    }

    for hook in validators {
        let response = match tokio::time::timeout(timeout, hook.review(&request)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(hook = hook.name(), "Validating hook timed out; denying");
                return AdmissionOutcome::Denied {
                    reason: DenialReason::ServiceUnavailable,
                    message: format!("admission hook {} timed out", hook.name()),
                };
            }
        };
        if !response.allowed {
            return denial(hook.name(), response);
        }
        warnings.extend(response.warnings.iter().cloned());
    }

    AdmissionOutcome::Allowed {
        object: request.object,
        warnings,
    }
}

fn denial(hook: &str, response: AdmissionResponse) -> AdmissionOutcome {
    let (reason, message) = match response.status {
        Some(status) => (status.reason, status.message),
        None => (DenialReason::Forbidden, format!("denied by {}", hook)),
    };
    debug!(hook, %reason, %message, "Request denied by admission");
    AdmissionOutcome::Denied { reason, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hnc_types::admission::{Operation, PatchOperation, UserInfo};
    use serde_json::json;

    struct LabelMutator;

    #[async_trait]
    impl AdmissionHook for LabelMutator {
        fn name(&self) -> &str {
            "label-mutator"
        }

        fn is_mutating(&self) -> bool {
            true
        }

        fn handles(&self, _resource: &GroupResource) -> bool {
            true
        }

        async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse {
            AdmissionResponse::allow(&request.uid)
                .with_patch(&[PatchOperation::add("/metadata/labels", json!({ "seen": "yes" }))])
                .unwrap()
        }
    }

    struct RequireLabel;

    #[async_trait]
    impl AdmissionHook for RequireLabel {
        fn name(&self) -> &str {
            "require-label"
        }

        fn handles(&self, _resource: &GroupResource) -> bool {
            true
        }

        async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse {
            let seen = request
                .object
                .as_ref()
                .and_then(|o| o.pointer("/metadata/labels/seen"))
                .is_some();
            if seen {
                AdmissionResponse::allow(&request.uid)
            } else {
                AdmissionResponse::deny(&request.uid, DenialReason::Forbidden, "not seen")
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl AdmissionHook for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn handles(&self, _resource: &GroupResource) -> bool {
            true
        }

        async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse {
            tokio::time::sleep(Duration::from_secs(60)).await;
            AdmissionResponse::allow(&request.uid)
        }
    }

    fn request() -> AdmissionRequest {
        AdmissionRequest {
            uid: "1".into(),
            resource: GroupResource::new("", "configmaps"),
            kind: "ConfigMap".into(),
            namespace: Some("a".into()),
            name: "c".into(),
            operation: Operation::Create,
            user_info: UserInfo::new("alice"),
            object: Some(json!({ "metadata": { "name": "c", "namespace": "a" } })),
            old_object: None,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn test_mutators_run_before_validators() {
        let hooks: Vec<Arc<dyn AdmissionHook>> = vec![Arc::new(RequireLabel), Arc::new(LabelMutator)];
        let outcome = run_hooks(&hooks, request(), DEFAULT_HOOK_TIMEOUT).await;
        let AdmissionOutcome::Allowed { object, .. } = outcome else {
            panic!("expected the request to be allowed");
        };
        assert_eq!(object.unwrap()["metadata"]["labels"]["seen"], "yes");
    }

    #[tokio::test]
    async fn test_validator_denial() {
        let hooks: Vec<Arc<dyn AdmissionHook>> = vec![Arc::new(RequireLabel)];
        let outcome = run_hooks(&hooks, request(), DEFAULT_HOOK_TIMEOUT).await;
        assert!(matches!(
            outcome,
            AdmissionOutcome::Denied { reason: DenialReason::Forbidden, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_validator_fails_closed() {
        let hooks: Vec<Arc<dyn AdmissionHook>> = vec![Arc::new(Slow)];
        let outcome = run_hooks(&hooks, request(), DEFAULT_HOOK_TIMEOUT).await;
        assert!(matches!(
            outcome,
            AdmissionOutcome::Denied { reason: DenialReason::ServiceUnavailable, .. }
        ));
    }
}
