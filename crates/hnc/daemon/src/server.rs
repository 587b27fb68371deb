//! Server setup and lifecycle management

use crate::api::{reader_router, webhook_router, Health, ReaderState, WebhookState};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::tls::{self, ReaderTls};
use axum::Router;
use hnc_admission::AdmissionChain;
use hnc_client::InMemoryCluster;
use hnc_forest::Forest;
use hnc_reconcilers::Manager;
use hnc_types::admission::UserInfo;
use hnc_types::HncOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// HNC manager process: platform store, controllers and both HTTP servers
pub struct Server {
    config: DaemonConfig,
    cluster: InMemoryCluster,
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
    chain: Arc<AdmissionChain>,
    manager: Arc<Manager>,
    health: Health,
}

impl Server {
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let options = Arc::new(HncOptions::from_settings(&config.hnc)?);
        let cluster = InMemoryCluster::new();

        // Seeds predate the hooks, like objects that existed before HNC was installed
        if let Some(path) = &config.seed_manifests {
            let text = tokio::fs::read_to_string(path).await?;
            let count = cluster.load_manifests(&text).await?;
            info!(path = %path, count, "Loaded seed manifests");
        }

        let forest = Arc::new(Forest::new());
        let chain = Arc::new(AdmissionChain::new(
            forest.clone(),
            options.clone(),
            cluster.shared_catalog(),
        ));
        chain.register(&cluster);
        cluster.set_hook_timeout(config.webhook.timeout());

        let hnc_client = cluster.impersonate(UserInfo::new(options.service_account()));
        let manager = Arc::new(Manager::new(
            Arc::new(hnc_client),
            forest.clone(),
            options.clone(),
            config.controllers.manager_config(),
        ));

        Ok(Self {
            config,
            cluster,
            forest,
            options,
            chain,
            manager,
            health: Health::new(),
        })
    }

    /// Admin access to the hosted store
    pub fn cluster(&self) -> &InMemoryCluster {
        &self.cluster
    }

    pub fn webhook_state(&self) -> WebhookState {
        WebhookState::new(
            self.chain.clone(),
            self.config.webhook.timeout(),
            self.health.clone(),
        )
    }

    pub fn reader_state(&self) -> ReaderState {
        ReaderState::new(
            Arc::new(self.cluster.clone()),
            self.forest.clone(),
            self.options.clone(),
            self.config.reader.authorized_users.clone(),
            self.health.clone(),
        )
    }

    /// Runs until SIGINT/SIGTERM or until a server fails
    pub async fn run(self) -> DaemonResult<()> {
        let token = CancellationToken::new();
        let manager = tokio::spawn(self.manager.clone().run(token.clone()));

        let mut servers = JoinSet::new();
        let addr = self.config.webhook.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, paths = self.chain.paths().len(), "Admission webhooks listening");
        servers.spawn(serve(listener, webhook_router(self.webhook_state()), token.clone()));

        if self.config.reader.enabled {
            match &self.config.reader.tls {
                Some(files) => {
                    let tls = ReaderTls::load(files).await?;
                    let addr = self.config.reader.listen_addr;
                    let listener = TcpListener::bind(addr).await?;
                    info!(
                        %addr,
                        users = self.config.reader.authorized_users.len(),
                        "Aggregated reader listening"
                    );
                    servers.spawn(tls::serve(
                        listener,
                        reader_router(self.reader_state()),
                        tls,
                        token.clone(),
                    ));
                }
                None => warn!("Aggregated reader has no reader.tls configured; not serving it"),
            }
        }

        let signal_token = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            signal_token.cancel();
        });

        let mut result = Ok(());
        while let Some(joined) = servers.join_next().await {
            let outcome = joined
                .map_err(|e| DaemonError::Server(e.to_string()))
                .and_then(|served| served);
            if let Err(e) = outcome {
                error!(error = %e, "Server failed; shutting down");
                token.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        token.cancel();
        match manager.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Controllers stopped with an error"),
            Err(e) => error!(error = %e, "Controller task panicked"),
        }

        info!(uptime = %self.health.uptime(), "HNC manager stopped");
        result
    }
}

async fn serve(listener: TcpListener, app: Router, token: CancellationToken) -> DaemonResult<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .map_err(|e| DaemonError::Server(e.to_string()))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hnc_client::{typed, ClusterClient};
    use hnc_types::{ApiResource, Namespace};
    use std::io::Write;

    #[tokio::test]
    async fn test_new_loads_seed_manifests() {
        let path = std::env::temp_dir().join(format!("hnc-seed-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "apiVersion: v1\nkind: Namespace\nmetadata: {{name: team}}\n---\napiVersion: v1\nkind: ConfigMap\nmetadata: {{name: settings, namespace: team}}"
        )
        .unwrap();

        let config = DaemonConfig {
            seed_manifests: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let server = Server::new(config).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let team: Option<Namespace> = typed::get_opt(server.cluster(), None, "team").await.unwrap();
        assert!(team.is_some());
        let settings = server
            .cluster()
            .get_opt(&ApiResource::config_maps(), Some("team"), "settings")
            .await
            .unwrap();
        assert!(settings.is_some());
    }

    #[tokio::test]
    async fn test_new_rejects_bad_options() {
        let mut config = DaemonConfig::default();
        config.hnc.included_namespace_regex = "(".to_string();
        assert!(matches!(
            Server::new(config).await,
            Err(DaemonError::Options(_))
        ));
    }

    #[tokio::test]
    async fn test_states_share_the_forest() {
        let mut config = DaemonConfig::default();
        config.reader.authorized_users = vec!["alice".to_string()];
        let server = Server::new(config).await.unwrap();
        let reader = server.reader_state();
        assert!(Arc::ptr_eq(&reader.forest, &server.forest));
        assert!(reader.is_authorized("alice"));
        assert!(!reader.is_authorized("bob"));
        assert_eq!(server.webhook_state().chain.paths().len(), 6);
    }
}
