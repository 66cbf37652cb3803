use actix_web::web::Data;
use actix_web::{HttpResponse, get};
use bitesize::reconciler::Snapshot;
use tokio::sync::watch;

use crate::routes::ErrorMessage;

/// The environment last loaded from the manifest, as the reconcile loop saw
/// it.
#[get("/environment")]
pub async fn get_environment(snapshot: Data<watch::Receiver<Snapshot>>) -> HttpResponse {
    let desired = snapshot.borrow().desired.clone();
    match desired {
        Some(environment) => HttpResponse::Ok().json(environment.as_ref()),
        None => HttpResponse::NotFound().json(ErrorMessage::new("no environment loaded yet")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, test};
    use bitesize::model::Environment;

    use super::*;

    #[actix_web::test]
    async fn returns_the_published_desired_environment() {
        let (tx, rx) = watch::channel(Snapshot::default());
        tx.send_replace(Snapshot {
            desired: Some(Arc::new(Environment {
                name: "dev".into(),
                namespace: "sample".into(),
                services: Vec::new(),
            })),
            observed: None,
        });

        let app = test::init_service(
            App::new()
                .app_data(Data::new(rx))
                .service(get_environment),
        )
        .await;

        let request = test::TestRequest::get().uri("/environment").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["name"], "dev");
        assert_eq!(body["namespace"], "sample");
    }

    #[actix_web::test]
    async fn responds_not_found_before_the_first_tick() {
        let (_tx, rx) = watch::channel(Snapshot::default());
        let app = test::init_service(
            App::new()
                .app_data(Data::new(rx))
                .service(get_environment),
        )
        .await;

        let request = test::TestRequest::get().uri("/environment").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 404);
    }
}
