//! Aggregated reader: lists and watches resources across a namespace subtree
//!
//! Served under `/apis/resources.hnc.x-k8s.io/v1alpha1`. Resource segments
//! use the `resource[.group]` form, e.g. `secrets` or
//! `roles.rbac.authorization.k8s.io`.

use crate::api::state::ReaderState;
use crate::error::{ApiError, ApiResult};
use crate::tls::CallerIdentity;
use axum::extract::{Path, Query, Request, State};
use axum::middleware::Next;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use hnc_client::{ClusterClient, WatchEvent};
use hnc_forest::Forest;
use hnc_types::{keys, ApiResource, DynamicObject, GroupResource};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub watch: bool,
}

/// Admits only callers whose certificate name is on the allow-list
pub async fn authorize(
    State(state): State<ReaderState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let user = request
        .extensions()
        .get::<CallerIdentity>()
        .map(|caller| caller.0.clone())
        .ok_or_else(|| ApiError::Unauthorized("no client certificate".to_string()))?;
    if !state.is_authorized(&user) {
        return Err(ApiError::Forbidden(format!("{user} may not read hierarchical resources")));
    }
    Ok(next.run(request).await)
}

fn check_group_version(group: &str, version: &str) -> ApiResult<()> {
    if group == keys::RESOURCES_GROUP && version == keys::RESOURCES_VERSION {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("{group}/{version} is not served here")))
    }
}

fn resolve(state: &ReaderState, resource: &str) -> ApiResult<ApiResource> {
    let api = state.client.catalog().resolve(&GroupResource::parse(resource))?;
    if !api.namespaced {
        return Err(ApiError::BadRequest(format!("{resource} is not namespaced")));
    }
    Ok(api)
}

fn list_body(items: Vec<DynamicObject>) -> Json<Value> {
    Json(json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": items,
    }))
}

/// `GET /apis/{group}/{version}`
pub async fn discovery(
    State(state): State<ReaderState>,
    Path((group, version)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    check_group_version(&group, &version)?;
    let resources: Vec<Value> = state
        .client
        .catalog()
        .namespaced()
        .into_iter()
        .filter(|api| api.group != keys::GROUP)
        .map(|api| {
            json!({
                "name": api.group_resource().to_string(),
                "kind": api.kind,
                "namespaced": true,
                "verbs": ["list", "watch"],
            })
        })
        .collect();
    Ok(Json(json!({
        "apiVersion": "v1",
        "kind": "APIResourceList",
        "groupVersion": format!("{}/{}", keys::RESOURCES_GROUP, keys::RESOURCES_VERSION),
        "resources": resources,
    })))
}

/// `GET /apis/{group}/{version}/{resource}`: every namespace
pub async fn list_all(
    State(state): State<ReaderState>,
    Path((group, version, resource)): Path<(String, String, String)>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    check_group_version(&group, &version)?;
    let api = resolve(&state, &resource)?;
    if query.watch {
        let filter = WatchFilter {
            resource: api.group_resource(),
            root: None,
            forest: state.forest.clone(),
        };
        return Ok(watch(state.client.as_ref(), filter).into_response());
    }
    let items = state.client.list(&api, None).await?;
    Ok(list_body(items).into_response())
}

/// `GET /apis/{group}/{version}/namespaces/{namespace}/{resource}`: the namespace and its descendants
pub async fn list_subtree(
    State(state): State<ReaderState>,
    Path((group, version, namespace, resource)): Path<(String, String, String, String)>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    check_group_version(&group, &version)?;
    let api = resolve(&state, &resource)?;
    let subtree = subtree(&state, &namespace)?;
    if query.watch {
        let filter = WatchFilter {
            resource: api.group_resource(),
            root: Some(namespace),
            forest: state.forest.clone(),
        };
        return Ok(watch(state.client.as_ref(), filter).into_response());
    }

    let mut items = Vec::new();
    for ns in &subtree {
        items.extend(state.client.list(&api, Some(ns)).await?);
    }
    debug!(namespace = %namespace, resource = %api.group_resource(), namespaces = subtree.len(), items = items.len(), "Listed subtree");
    Ok(list_body(items).into_response())
}

fn subtree(state: &ReaderState, root: &str) -> ApiResult<Vec<String>> {
    if state.options.is_excluded_namespace(root) {
        return Err(ApiError::Forbidden(format!("{root} is excluded from HNC")));
    }
    let forest = state.forest.lock();
    if !forest.exists(root) {
        return Err(ApiError::NotFound(format!("namespace {root}")));
    }
    let mut namespaces = vec![root.to_string()];
    namespaces.extend(
        forest
            .descendants(root)
            .into_iter()
            .filter(|ns| forest.exists(ns) && !state.options.is_excluded_namespace(ns)),
    );
    Ok(namespaces)
}

/// Which watch events a stream forwards; subtree membership is checked per event
struct WatchFilter {
    resource: GroupResource,
    root: Option<String>,
    forest: Arc<Forest>,
}

impl WatchFilter {
    fn admits(&self, event: &WatchEvent) -> bool {
        if event.resource != self.resource {
            return false;
        }
        let (Some(root), Some(ns)) = (self.root.as_deref(), event.namespace()) else {
            return self.root.is_none();
        };
        ns == root || self.forest.lock().ancestors(ns).iter().any(|a| a == root)
    }
}

fn watch(
    client: &dyn ClusterClient,
    filter: WatchFilter,
) -> Sse<impl stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = client.watch();

    let stream = stream::unfold((rx, filter), |(mut rx, filter)| async move {
        loop {
            match rx.recv().await {
                Ok(event) if filter.admits(&event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().data(json)), (rx, filter)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => {
                    return Some((Ok(Event::default().comment("lagged")), (rx, filter)));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hnc_client::WatchEventType;
    use hnc_types::ObjectMeta;

    fn event(api: &ApiResource, ns: &str) -> WatchEvent {
        WatchEvent::new(
            WatchEventType::Added,
            api.group_resource(),
            DynamicObject::new(api, ObjectMeta::namespaced(ns, "x")),
        )
    }

    #[test]
    fn test_watch_filter_follows_the_tree() {
        let forest = Arc::new(Forest::new());
        {
            let mut f = forest.lock();
            for ns in ["a", "b", "c", "d"] {
                f.set_exists(ns, true);
            }
            f.set_parent("b", Some("a")).unwrap();
            f.set_parent("c", Some("b")).unwrap();
        }
        let secrets = ApiResource::secrets();
        let subtree = WatchFilter {
            resource: secrets.group_resource(),
            root: Some("a".to_string()),
            forest: forest.clone(),
        };
        assert!(subtree.admits(&event(&secrets, "a")));
        assert!(subtree.admits(&event(&secrets, "c")));
        assert!(!subtree.admits(&event(&secrets, "d")));
        assert!(!subtree.admits(&event(&ApiResource::config_maps(), "b")));

        // Moves are seen by streams that are already open
        forest.lock().set_parent("d", Some("c")).unwrap();
        assert!(subtree.admits(&event(&secrets, "d")));

        let everywhere = WatchFilter {
            resource: secrets.group_resource(),
            root: None,
            forest,
        };
        assert!(everywhere.admits(&event(&secrets, "d")));
    }
}
