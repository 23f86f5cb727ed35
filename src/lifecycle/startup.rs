//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the subsystems in dependency order
//! - Execute the startup script before any traffic is accepted
//! - Start background tasks (script watcher, admin API)
//! - Serve until shutdown, then stop the engine
//!
//! # Design Decisions
//! - Fail fast: a failing startup script is fatal
//! - Listeners start last (traffic only when routes exist)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::ServerConfig;
use crate::connections::ConnectionRegistry;
use crate::error::Error;
use crate::http::{Dispatcher, HttpServer};
use crate::lifecycle::Shutdown;
use crate::routing::RouteTable;
use crate::script::watcher::{self, ScriptWatcher};
use crate::script::{EngineLimits, ExecutionScope, ExecutionSerializer, Host, RhaiEngine};

/// Everything a running server is made of.
pub struct Application {
    config: ServerConfig,
    routes: Arc<RouteTable>,
    registry: Arc<ConnectionRegistry>,
    serializer: Arc<ExecutionSerializer>,
    dispatcher: Dispatcher,
    shutdown: Shutdown,
}

impl Application {
    /// Build the subsystems and start the engine worker.
    pub fn new(config: ServerConfig) -> std::io::Result<Self> {
        let routes = Arc::new(RouteTable::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = Shutdown::new();

        let host = Host::new(
            Arc::clone(&routes),
            Arc::clone(&registry),
            shutdown.clone(),
            config.streaming.event_name.clone(),
        );
        let limits = EngineLimits {
            max_operations: config.script.max_operations,
            max_call_levels: config.script.max_call_levels,
        };
        let serializer = Arc::new(ExecutionSerializer::start(RhaiEngine::new(host, limits))?);

        let dispatcher = Dispatcher::new(
            Arc::clone(&routes),
            Arc::clone(&registry),
            Arc::clone(&serializer),
            Duration::from_secs(config.streaming.keepalive_secs),
        );

        Ok(Self {
            config,
            routes,
            registry,
            serializer,
            dispatcher,
            shutdown,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn serializer(&self) -> &Arc<ExecutionSerializer> {
        &self.serializer
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Execute script source with no request context.
    pub async fn eval(&self, source: &str) -> Result<String, Error> {
        self.serializer
            .execute(source, ExecutionScope::detached())
            .await
    }

    /// Read and execute a script file.
    pub async fn load_script(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        self.eval(&source)
            .await
            .map_err(|e| format!("{}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), routes = self.routes.len(), "Script loaded");
        Ok(())
    }

    /// Serve on `listener` (and the admin API if enabled) until shutdown.
    pub async fn serve(self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        let _watcher = if self.config.script.watch {
            let (script_watcher, updates) = ScriptWatcher::new(Path::new(&self.config.script.path));
            let handle = script_watcher.run()?;
            tokio::spawn(watcher::apply_updates(
                updates,
                Arc::clone(&self.serializer),
                self.shutdown.clone(),
            ));
            Some(handle)
        } else {
            None
        };

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            let app = setup_admin_router(AdminState {
                routes: Arc::clone(&self.routes),
                registry: Arc::clone(&self.registry),
                serializer: Arc::clone(&self.serializer),
                api_key: Arc::from(self.config.admin.api_key.as_str()),
            });
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let server = axum::serve(admin_listener, app)
                    .with_graceful_shutdown(async move { shutdown.wait().await });
                if let Err(e) = server.await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let server = HttpServer::new(
            self.dispatcher.clone(),
            Arc::clone(&self.registry),
            &self.config.http,
        );
        let result = server.run(listener, self.shutdown.clone()).await;

        let serializer = Arc::clone(&self.serializer);
        if tokio::task::spawn_blocking(move || serializer.join()).await.is_err() {
            tracing::error!("Failed to stop script engine");
        }
        tracing::info!("Shutdown complete");
        result.map_err(Into::into)
    }
}
