use actix_web::web::Data;
use actix_web::{HttpResponse, get};
use bitesize::cluster::Cluster;

use crate::routes::ErrorMessage;

/// Pods owned by the operator, with phase and start time.
#[get("/pods")]
pub async fn get_pods(cluster: Data<Cluster>) -> HttpResponse {
    match cluster.load_pods().await {
        Ok(pods) => HttpResponse::Ok().json(pods),
        Err(err) => HttpResponse::BadGateway().json(ErrorMessage::new(err.to_string())),
    }
}
