//! Read-only status surface for the environment operator.
//!
//! Exposes the last published reconcile snapshot (desired and observed
//! environment), per-service status and pod logs over HTTP. The reconcile
//! loop publishes immutable snapshots through a watch channel, so serving a
//! request never takes a lock shared with the reconcile path.

pub mod authentication;
pub mod routes;

use std::net::TcpListener;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::middleware::Condition;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use actix_web_httpauth::middleware::HttpAuthentication;
use bitesize::cluster::Cluster;
use bitesize::reconciler::Snapshot;
use tokio::sync::watch;
use tracing_actix_web::TracingLogger;

use crate::authentication::{ExpectedToken, auth_validator};
use crate::routes::environment::get_environment;
use crate::routes::health_check::health_check;
use crate::routes::logs::get_pod_logs;
use crate::routes::pods::get_pods;
use crate::routes::status::{get_service_status, get_status};

/// Settings for the status API server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// When set, every request must carry this bearer token.
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> ApiConfig {
        ApiConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth_token: None,
        }
    }
}

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    /// Binds the listener and assembles the server without starting it.
    pub fn build(
        config: ApiConfig,
        snapshot: watch::Receiver<Snapshot>,
        cluster: Arc<Cluster>,
    ) -> Result<Application, anyhow::Error> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();
        let server = run(listener, config, snapshot, cluster)?;

        Ok(Application { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

fn run(
    listener: TcpListener,
    config: ApiConfig,
    snapshot: watch::Receiver<Snapshot>,
    cluster: Arc<Cluster>,
) -> Result<Server, anyhow::Error> {
    let auth_enabled = config.auth_token.is_some();
    let expected_token = Data::new(ExpectedToken::new(config.auth_token));
    let snapshot = Data::new(snapshot);
    let cluster = Data::from(cluster);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Condition::new(
                auth_enabled,
                HttpAuthentication::bearer(auth_validator),
            ))
            .app_data(expected_token.clone())
            .app_data(snapshot.clone())
            .app_data(cluster.clone())
            .service(health_check)
            .service(get_environment)
            .service(get_status)
            .service(get_service_status)
            .service(get_pods)
            .service(get_pod_logs)
    })
    .listen(listener)?
    .run();

    Ok(server)
}
