//! Proxy server: accept loop, maintenance and shutdown.
//!
//! # Responsibilities
//! - Bind the listener and build the shared context
//! - Spawn one handler task per accepted connection
//! - Run the maintenance scheduler
//! - Drain connections and persist rule lists on shutdown

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::validation::split_host_port;
use crate::config::ProxyConfig;
use crate::lifecycle::scheduler::rule_maintenance;
use crate::lifecycle::{Scheduler, Shutdown};
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::policy::UserProfile;
use crate::proxy::context::ProxyContext;
use crate::proxy::handler::ClientHandler;
use crate::proxy::local::{LocalService, Resources, StatusPage};
use crate::proxy::router::{LocalAddress, OriginAddress};
use crate::rules::RuleError;

/// Profile name used when the configuration does not name users.
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to load rule lists: {0}")]
    Rules(#[from] RuleError),
    #[error("invalid forward address: {0}")]
    Forward(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound forward proxy, ready to run.
pub struct ProxyServer {
    config: ProxyConfig,
    listener: Listener,
    profile: Arc<UserProfile>,
    service: Arc<dyn LocalService>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Load the rule lists from the configured directory and bind.
    pub async fn bind(config: ProxyConfig) -> Result<Self, ServerError> {
        let profile = UserProfile::load(
            DEFAULT_PROFILE,
            config.policy.clone(),
            config.rules.directory.as_deref(),
        )?;
        Self::bind_with_profile(config, Arc::new(profile)).await
    }

    /// Bind with an already built profile.
    pub async fn bind_with_profile(
        config: ProxyConfig,
        profile: Arc<UserProfile>,
    ) -> Result<Self, ServerError> {
        let listener = Listener::bind(&config.listener).await?;
        Ok(Self {
            config,
            listener,
            profile,
            service: Arc::new(StatusPage),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Replace the built-in status page with another local service.
    pub fn with_local_service(mut self, service: Arc<dyn LocalService>) -> Self {
        self.service = service;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn profile(&self) -> &Arc<UserProfile> {
        &self.profile
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    fn forward_address(&self) -> Result<Option<OriginAddress>, ServerError> {
        match &self.config.forward.address {
            None => Ok(None),
            Some(address) => split_host_port(address)
                .map(|(host, port)| Some(OriginAddress::new(host.to_ascii_lowercase(), port)))
                .ok_or_else(|| ServerError::Forward(address.clone())),
        }
    }

    fn context(&self, shutdown: &Shutdown) -> Result<ProxyContext, ServerError> {
        Ok(ProxyContext {
            profile: Arc::clone(&self.profile),
            local: LocalAddress::new(&self.config.listener.hostname, self.local_addr()?),
            forward: self.forward_address()?,
            timeouts: self.config.timeouts.clone(),
            resources: Resources::new(self.config.resources.directory.clone()),
            service: Arc::clone(&self.service),
            shutdown: shutdown.clone(),
        })
    }

    fn rules_dir(&self) -> Option<PathBuf> {
        self.config.rules.directory.clone()
    }

    fn spawn_scheduler(&self, shutdown: &Shutdown) -> tokio::task::JoinHandle<()> {
        let maintenance = &self.config.maintenance;
        let mut scheduler = Scheduler::new(Duration::from_secs(maintenance.tick_secs));
        scheduler.every(
            "rule maintenance",
            Duration::from_secs(maintenance.rules_refresh_secs),
            rule_maintenance(Arc::clone(&self.profile), self.rules_dir()),
        );
        tokio::spawn(scheduler.run(shutdown.subscribe()))
    }

    /// Accept connections until `shutdown` fires, then drain and persist.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), ServerError> {
        let ctx = Arc::new(self.context(&shutdown)?);
        let scheduler = self.spawn_scheduler(&shutdown);
        let mut stop = shutdown.subscribe();

        tracing::info!(
            address = %ctx.local.addr(),
            local_url = %ctx.local_url(),
            forward = ?ctx.forward.as_ref().map(OriginAddress::key),
            "Proxy server starting"
        );

        while !shutdown.is_triggered() {
            tokio::select! {
                _ = stop.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let guard = self.tracker.track();
                        let handler =
                            ClientHandler::new(Arc::clone(&ctx), guard.id(), stream, peer.to_string());
                        tokio::spawn(async move {
                            handler.run().await;
                            drop(guard);
                            drop(permit);
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Proxy server stopping, draining connections"
        );
        let drain_limit = self.config.timeouts.client_wait() + Duration::from_secs(1);
        if !self.tracker.wait_for_shutdown(drain_limit).await {
            tracing::warn!(
                active_connections = self.tracker.active_count(),
                "Connections still active after drain period"
            );
        }

        if let Err(e) = scheduler.await {
            tracing::warn!(error = %e, "Scheduler task failed");
        }

        if let Some(dir) = self.rules_dir() {
            match self.profile.rules().save_dir(&dir) {
                Ok(()) => tracing::info!(dir = %dir.display(), "Rule lists saved"),
                Err(e) => tracing::error!(dir = %dir.display(), error = %e, "Failed to save rule lists"),
            }
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "127.0.0.1:0".to_string();
        config
    }

    #[tokio::test]
    async fn forward_address_is_parsed() {
        let mut config = config();
        config.forward.address = Some("Upstream.lan:3128".to_string());
        let server = ProxyServer::bind(config).await.unwrap();
        assert_eq!(
            server.forward_address().unwrap(),
            Some(OriginAddress::new("upstream.lan", 3128))
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_saves_rules() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.rules.directory = Some(dir.path().to_path_buf());

        let server = ProxyServer::bind(config).await.unwrap();
        server
            .profile()
            .rules()
            .block_rules
            .add_patterns(Some("ads.example"), None, None)
            .unwrap();

        let shutdown = Shutdown::new();
        let task = tokio::spawn(server.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        task.await.unwrap().unwrap();

        let saved = std::fs::read_to_string(dir.path().join("blockrules")).unwrap();
        assert!(saved.contains("ads.example"));
    }
}
