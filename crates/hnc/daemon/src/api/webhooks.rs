//! Admission webhook handlers

use crate::api::state::WebhookState;
use crate::error::ApiResult;
use axum::extract::{MatchedPath, State};
use axum::Json;
use hnc_admission::AdmissionError;
use hnc_types::admission::{AdmissionResponse, AdmissionReview, DenialReason};
use tracing::warn;

/// Answers an `AdmissionReview` posted to one of the hook paths
///
/// A review that overruns the deadline is refused by validators and let
/// through by mutators.
pub async fn review(
    State(state): State<WebhookState>,
    path: MatchedPath,
    Json(review): Json<AdmissionReview>,
) -> ApiResult<Json<AdmissionReview>> {
    let path = path.as_str();
    let uid = review
        .request
        .as_ref()
        .map(|r| r.uid.clone())
        .ok_or(AdmissionError::MissingRequest)?;

    match tokio::time::timeout(state.timeout, state.chain.review(path, review)).await {
        Ok(answer) => Ok(Json(answer?)),
        Err(_) => {
            let mutating = state.chain.by_path(path).is_some_and(|h| h.is_mutating());
            warn!(path = %path, %uid, mutating, "Admission review timed out");
            let response = if mutating {
                AdmissionResponse::allow(uid)
            } else {
                AdmissionResponse::deny(
                    uid,
                    DenialReason::ServiceUnavailable,
                    "HNC could not answer in time; retry the request",
                )
            };
            Ok(Json(AdmissionReview::response(response)))
        }
    }
}
