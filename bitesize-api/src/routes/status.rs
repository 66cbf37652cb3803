use actix_web::web::{Data, Path};
use actix_web::{HttpResponse, get};
use bitesize::model::{Environment, Service};
use bitesize::reconciler::Snapshot;
use serde::Serialize;
use tokio::sync::watch;

use crate::routes::ErrorMessage;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub environment: String,
    pub namespace: String,
    pub services: Vec<ServiceStatusResponse>,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatusResponse {
    pub name: String,
    pub version: String,
    pub deployed_at: String,
    pub replicas: ReplicaStatus,
}

#[derive(Debug, Serialize)]
pub struct ReplicaStatus {
    pub desired: i32,
    pub available: i32,
}

/// Per-service observed status, from the last cluster read.
#[get("/status")]
pub async fn get_status(snapshot: Data<watch::Receiver<Snapshot>>) -> HttpResponse {
    let observed = snapshot.borrow().observed.clone();
    match observed {
        Some(environment) => HttpResponse::Ok().json(status_of(&environment)),
        None => HttpResponse::NotFound().json(ErrorMessage::new("no cluster state observed yet")),
    }
}

/// Observed status of a single service.
#[get("/status/{service}")]
pub async fn get_service_status(
    snapshot: Data<watch::Receiver<Snapshot>>,
    service: Path<String>,
) -> HttpResponse {
    let observed = snapshot.borrow().observed.clone();
    let Some(environment) = observed else {
        return HttpResponse::NotFound().json(ErrorMessage::new("no cluster state observed yet"));
    };

    match environment.find_service(&service) {
        Some(found) => HttpResponse::Ok().json(service_status(found)),
        None => HttpResponse::NotFound().json(ErrorMessage::new(format!(
            "service {} is not deployed",
            service.as_str()
        ))),
    }
}

fn status_of(environment: &Environment) -> StatusResponse {
    StatusResponse {
        environment: environment.name.clone(),
        namespace: environment.namespace.clone(),
        services: environment.services.iter().map(service_status).collect(),
    }
}

fn service_status(service: &Service) -> ServiceStatusResponse {
    ServiceStatusResponse {
        name: service.name.clone(),
        version: service.version.clone(),
        deployed_at: service.status.deployed_at.clone(),
        replicas: ReplicaStatus {
            desired: service.status.desired_replicas,
            available: service.status.available_replicas,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, test};
    use bitesize::model::ServiceStatus;

    use super::*;

    fn observed_environment() -> Environment {
        Environment {
            name: "dev".into(),
            namespace: "sample".into(),
            services: vec![Service {
                name: "api".into(),
                version: "1.0.0".into(),
                status: ServiceStatus {
                    deployed_at: "2019-03-21T10:00:00+00:00".into(),
                    desired_replicas: 2,
                    available_replicas: 2,
                    ..ServiceStatus::default()
                },
                ..Service::default()
            }],
        }
    }

    #[actix_web::test]
    async fn reports_observed_service_status() {
        let (tx, rx) = watch::channel(Snapshot::default());
        tx.send_replace(Snapshot {
            desired: None,
            observed: Some(Arc::new(observed_environment())),
        });

        let app = test::init_service(
            App::new()
                .app_data(Data::new(rx))
                .service(get_status)
                .service(get_service_status),
        )
        .await;

        let request = test::TestRequest::get().uri("/status").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["services"][0]["name"], "api");
        assert_eq!(body["services"][0]["replicas"]["desired"], 2);

        let request = test::TestRequest::get().uri("/status/api").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["version"], "1.0.0");

        let request = test::TestRequest::get().uri("/status/ghost").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 404);
    }
}
