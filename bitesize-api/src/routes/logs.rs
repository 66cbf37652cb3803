use actix_web::web::{Data, Path};
use actix_web::{HttpResponse, get};
use bitesize::cluster::Cluster;

use crate::routes::ErrorMessage;

/// Raw logs of one pod in the managed namespace.
#[get("/logs/{pod}")]
pub async fn get_pod_logs(cluster: Data<Cluster>, pod: Path<String>) -> HttpResponse {
    match cluster.pod_logs(&pod).await {
        Ok(logs) => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(logs),
        Err(err) => HttpResponse::BadGateway().json(ErrorMessage::new(err.to_string())),
    }
}
