use actix_web::{Error, dev::ServiceRequest, web::Data};
use actix_web_httpauth::extractors::{
    AuthenticationError,
    bearer::{BearerAuth, Config},
};
use constant_time_eq::constant_time_eq;

/// The bearer token every request must present when auth is enabled.
pub struct ExpectedToken(Option<String>);

impl ExpectedToken {
    pub fn new(token: Option<String>) -> ExpectedToken {
        ExpectedToken(token)
    }
}

pub async fn auth_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let config = req.app_data::<Config>().cloned().unwrap_or_default();

    let expected = req
        .app_data::<Data<ExpectedToken>>()
        .and_then(|token| token.0.as_deref());

    match expected {
        Some(token) if constant_time_eq(token.as_bytes(), credentials.token().as_bytes()) => {
            Ok(req)
        }
        _ => Err((AuthenticationError::from(config).into(), req)),
    }
}
