//! End-to-end scenarios: a full manager and admission chain over an in-memory cluster

use hnc_admission::AdmissionChain;
use hnc_client::{typed, ClientError, ClusterClient, InMemoryCluster};
use hnc_forest::Forest;
use hnc_reconcilers::{ControllerConfig, Manager, ManagerConfig};
use hnc_types::admission::UserInfo;
use hnc_types::{
    keys, AnchorState, ApiResource, ConditionCode, DynamicObject, HierarchyConfiguration,
    HncOptions, HncSettings, MetaKvp, Namespace, ObjectMeta, SubnamespaceAnchor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

macro_rules! eventually {
    ($what:expr, $check:expr) => {{
        let mut settled = false;
        for _ in 0..1000 {
            if $check {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled, "timed out waiting for {}", $what);
    }};
}

struct Env {
    /// Acts as an ordinary user; subject to every validator
    user: InMemoryCluster,
    /// HNC's own identity, which the validators let through
    hnc: InMemoryCluster,
    forest: Arc<Forest>,
    token: CancellationToken,
    handle: JoinHandle<hnc_reconcilers::Result<()>>,
}

impl Env {
    async fn start(settings: HncSettings) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let options = Arc::new(HncOptions::from_settings(&settings).unwrap());
        let cluster = InMemoryCluster::new();
        let forest = Arc::new(Forest::new());
        AdmissionChain::new(forest.clone(), options.clone(), cluster.shared_catalog()).register(&cluster);

        let hnc = cluster.impersonate(UserInfo::new(options.service_account()));
        let config = ManagerConfig {
            controller: ControllerConfig {
                workers: 4,
                grace_period: Duration::from_secs(2),
            },
            ..Default::default()
        };
        let manager = Arc::new(Manager::new(Arc::new(hnc.clone()), forest.clone(), options, config));
        let token = CancellationToken::new();
        let handle = tokio::spawn(manager.run(token.clone()));

        Self {
            user: cluster.impersonate(UserInfo::new("alice")),
            hnc,
            forest,
            token,
            handle,
        }
    }

    async fn stop(self) {
        self.token.cancel();
        self.handle.await.unwrap().unwrap();
    }

    async fn namespace(&self, name: &str) -> Option<Namespace> {
        typed::get_opt(&self.user, None, name).await.unwrap()
    }

    async fn hierarchy(&self, name: &str) -> Option<HierarchyConfiguration> {
        typed::get_opt(&self.user, Some(name), keys::HIERARCHY_SINGLETON)
            .await
            .unwrap()
    }

    async fn anchor(&self, parent: &str, name: &str) -> Option<SubnamespaceAnchor> {
        typed::get_opt(&self.user, Some(parent), name).await.unwrap()
    }

    async fn anchor_state(&self, parent: &str, name: &str) -> Option<AnchorState> {
        self.anchor(parent, name).await.and_then(|a| a.status.state)
    }

    async fn create_namespace(&self, name: &str) {
        typed::create(&self.user, &Namespace::new(name)).await.unwrap();
        eventually!(format!("{name} in the forest"), self.forest.lock().exists(name));
    }

    async fn create_anchor(&self, parent: &str, name: &str) {
        typed::create(&self.user, &SubnamespaceAnchor::new(parent, name))
            .await
            .unwrap();
    }

    /// Creates `name` under `parent` through an anchor and waits until it is owned
    async fn create_subnamespace(&self, parent: &str, name: &str) {
        self.create_anchor(parent, name).await;
        eventually!(
            format!("anchor {parent}/{name} to be Ok"),
            self.anchor_state(parent, name).await == Some(AnchorState::Ok)
        );
        eventually!(
            format!("{name} under {parent} in the forest"),
            self.forest
                .lock()
                .get_opt(name)
                .is_some_and(|n| n.parent() == Some(parent) && n.is_subnamespace())
        );
    }

    async fn has_condition(&self, name: &str, code: ConditionCode) -> bool {
        self.hierarchy(name)
            .await
            .is_some_and(|hc| hc.status.conditions.iter().any(|c| c.code == code))
    }
}

fn managed_labels(pattern: &str) -> HncSettings {
    HncSettings {
        managed_namespace_labels: vec![pattern.to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_anchor_creates_subnamespace() {
    let env = Env::start(HncSettings::default()).await;
    env.create_namespace("foo").await;
    env.create_anchor("foo", "bar").await;

    eventually!(
        "bar with depth labels",
        env.namespace("bar").await.is_some_and(|ns| {
            ns.subnamespace_of() == Some("foo")
                && ns.metadata.label(&keys::depth_label("foo")) == Some("1")
                && ns.metadata.label(&keys::depth_label("bar")) == Some("0")
                && ns.metadata.label(keys::LABEL_INCLUDED_NAMESPACE) == Some("true")
        })
    );
    eventually!(
        "foo to list bar as a child",
        env.hierarchy("foo")
            .await
            .is_some_and(|hc| hc.status.children == vec!["bar".to_string()])
    );
    eventually!(
        "anchor to be Ok",
        env.anchor_state("foo", "bar").await == Some(AnchorState::Ok)
    );
    env.stop().await;
}

#[tokio::test]
async fn test_anchor_for_excluded_namespace_is_forbidden() {
    let env = Env::start(HncSettings::default()).await;
    env.create_namespace("foo").await;
    env.create_anchor("foo", "kube-system").await;

    eventually!(
        "anchor to be Forbidden",
        env.anchor_state("foo", "kube-system").await == Some(AnchorState::Forbidden)
    );
    let anchor = env.anchor("foo", "kube-system").await.unwrap();
    assert!(!anchor.metadata.has_finalizer(keys::FINALIZER_ANCHOR));
    assert!(env.namespace("kube-system").await.is_none());
    env.stop().await;
}

#[tokio::test]
async fn test_anchor_for_existing_namespace_conflicts() {
    let env = Env::start(HncSettings::default()).await;
    env.create_namespace("foo").await;
    env.create_namespace("baz").await;
    env.create_anchor("foo", "baz").await;

    eventually!(
        "anchor to be Conflict",
        env.anchor_state("foo", "baz").await == Some(AnchorState::Conflict)
    );
    let baz = env.namespace("baz").await.unwrap();
    assert_eq!(baz.subnamespace_of(), None);
    assert_eq!(env.forest.lock().get_opt("baz").and_then(|n| n.parent()), None);
    env.stop().await;
}

#[tokio::test]
async fn test_managed_labels_flow_from_anchor() {
    let env = Env::start(managed_labels("legal-.*")).await;
    env.create_namespace("foo").await;

    let mut anchor = SubnamespaceAnchor::new("foo", "bar");
    anchor.spec.labels = vec![MetaKvp::new("legal-x", "v1"), MetaKvp::new("other", "v2")];
    typed::create(&env.user, &anchor).await.unwrap();

    eventually!(
        "bar to carry only the managed label",
        env.namespace("bar").await.is_some_and(|ns| {
            ns.metadata.label("legal-x") == Some("v1") && ns.metadata.label("other").is_none()
        })
    );
    eventually!(
        "BadConfiguration on bar",
        env.has_condition("bar", ConditionCode::BadConfiguration).await
    );

    let mut anchor = env.anchor("foo", "bar").await.unwrap();
    anchor.spec.labels = vec![MetaKvp::new("legal-x", "v1")];
    typed::update(&env.user, &anchor).await.unwrap();

    eventually!(
        "BadConfiguration to clear",
        !env.has_condition("bar", ConditionCode::BadConfiguration).await
    );
    assert_eq!(
        env.namespace("bar").await.unwrap().metadata.label("legal-x"),
        Some("v1")
    );
    env.stop().await;
}

#[tokio::test]
async fn test_cascading_deletion() {
    let env = Env::start(HncSettings::default()).await;
    env.create_namespace("root").await;
    let chain = ["a", "b", "c", "d", "e"];
    let mut parent = "root";
    for name in chain {
        env.create_subnamespace(parent, name).await;
        parent = name;
    }

    let denied = env
        .user
        .delete(&ApiResource::subnamespace_anchors(), Some("root"), "a")
        .await;
    assert!(matches!(denied, Err(ClientError::Denied { .. })));
    let denied = env
        .user
        .delete(&ApiResource::namespaces(), None, "a")
        .await;
    assert!(matches!(denied, Err(ClientError::Denied { .. })));
    assert!(env.namespace("e").await.is_some());

    let mut hc = env.hierarchy("a").await.unwrap();
    hc.spec.allow_cascading_deletion = true;
    typed::update(&env.user, &hc).await.unwrap();
    eventually!(
        "cascading deletion on a",
        env.forest.lock().allows_cascading_deletion("e")
    );

    env.user
        .delete(&ApiResource::subnamespace_anchors(), Some("root"), "a")
        .await
        .unwrap();

    for name in chain {
        eventually!(format!("{name} to be deleted"), env.namespace(name).await.is_none());
    }
    eventually!("anchor a to be finalized", env.anchor("root", "a").await.is_none());
    assert!(env.namespace("root").await.is_some());
    env.stop().await;
}

#[tokio::test]
async fn test_cycle_is_rejected() {
    let env = Env::start(HncSettings::default()).await;
    env.create_namespace("a").await;
    env.create_namespace("b").await;

    let mut hc = HierarchyConfiguration::new("b");
    hc.spec.parent = Some("a".into());
    typed::create(&env.user, &hc).await.unwrap();
    eventually!(
        "b under a",
        env.forest.lock().get_opt("b").and_then(|n| n.parent()) == Some("a")
    );

    let attempt = match env.hierarchy("a").await {
        Some(mut hc) => {
            hc.spec.parent = Some("b".into());
            typed::update(&env.user, &hc).await
        }
        None => {
            let mut hc = HierarchyConfiguration::new("a");
            hc.spec.parent = Some("b".into());
            typed::create(&env.user, &hc).await
        }
    };
    match attempt {
        Err(ClientError::Denied { message, .. }) => assert!(message.contains("cycle")),
        other => panic!("expected a cycle denial, got {other:?}"),
    }

    let forest = env.forest.lock();
    assert_eq!(forest.get_opt("a").and_then(|n| n.parent()), None);
    assert_eq!(forest.get_opt("b").and_then(|n| n.parent()), Some("a"));
    drop(forest);
    env.stop().await;
}

#[tokio::test]
async fn test_objects_propagate_and_follow_the_tree() {
    let env = Env::start(HncSettings::default()).await;
    env.create_namespace("team").await;
    env.create_subnamespace("team", "dev").await;
    env.create_subnamespace("dev", "sandbox").await;

    let roles = ApiResource::roles();
    let role = DynamicObject::new(&roles, ObjectMeta::namespaced("team", "reader"))
        .with_data(serde_json::json!({ "rules": [{ "verbs": ["get"] }] }));
    env.user.create(&roles, role).await.unwrap();

    eventually!(
        "role copied to sandbox",
        env.user
            .get_opt(&roles, Some("sandbox"), "reader")
            .await
            .unwrap()
            .is_some_and(|copy| copy.metadata.annotation(keys::ANNOTATION_INHERITED_FROM) == Some("team"))
    );

    // Copies belong to HNC
    let denied = env.user.delete(&roles, Some("dev"), "reader").await;
    assert!(matches!(denied, Err(ClientError::Denied { .. })));

    env.user.delete(&roles, Some("team"), "reader").await.unwrap();
    eventually!(
        "copies removed",
        env.user.get_opt(&roles, Some("dev"), "reader").await.unwrap().is_none()
            && env.user.get_opt(&roles, Some("sandbox"), "reader").await.unwrap().is_none()
    );
    env.stop().await;
}

#[tokio::test]
async fn test_non_leaf_subnamespace_outlives_its_anchor() {
    let env = Env::start(HncSettings::default()).await;
    env.create_namespace("root").await;
    env.create_subnamespace("root", "team").await;
    env.create_namespace("dev").await;
    let mut hc = HierarchyConfiguration::new("dev");
    hc.spec.parent = Some("team".into());
    typed::create(&env.user, &hc).await.unwrap();
    eventually!(
        "dev under team",
        env.forest.lock().get_opt("dev").and_then(|n| n.parent()) == Some("team")
    );

    let denied = env
        .user
        .delete(&ApiResource::subnamespace_anchors(), Some("root"), "team")
        .await;
    assert!(matches!(denied, Err(ClientError::Denied { .. })));

    // Skips the validators, like a child that appears after the delete was admitted
    env.hnc
        .delete(&ApiResource::subnamespace_anchors(), Some("root"), "team")
        .await
        .unwrap();
    eventually!("anchor team to be finalized", env.anchor("root", "team").await.is_none());
    assert!(env.namespace("team").await.is_some());
    assert!(env.namespace("dev").await.is_some());
    eventually!(
        "team to report its missing anchor",
        env.has_condition("team", ConditionCode::SubnamespaceAnchorMissing).await
    );

    // Recreating the anchor adopts the namespace again
    env.create_anchor("root", "team").await;
    eventually!(
        "anchor team to be Ok",
        env.anchor_state("root", "team").await == Some(AnchorState::Ok)
    );
    eventually!(
        "missing-anchor condition to clear",
        !env.has_condition("team", ConditionCode::SubnamespaceAnchorMissing).await
    );
    env.stop().await;
}

#[tokio::test]
async fn test_removing_the_anchor_kind_keeps_subnamespaces() {
    let env = Env::start(HncSettings::default()).await;
    env.create_namespace("root").await;
    env.create_subnamespace("root", "a").await;
    env.create_subnamespace("root", "b").await;

    let pending = env
        .hnc
        .remove_kind(&ApiResource::subnamespace_anchors())
        .await
        .unwrap();
    assert_eq!(pending, 2);

    for name in ["a", "b"] {
        eventually!(
            format!("anchor {name} to be finalized"),
            env.anchor("root", name).await.is_none()
        );
        assert!(env.namespace(name).await.is_some());
    }
    eventually!(
        "anchor kind to be gone",
        !env.user
            .catalog()
            .contains(&ApiResource::subnamespace_anchors().group_resource())
    );
    env.stop().await;
}
