//! Request extractors that enforce authentication at the type level.

use super::auth::bearer_token;
use crate::error::AppError;
use crate::models::ParticipantProfile;
use crate::state::AppState;
use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use std::ops::Deref;

/// The organisation behind the request's bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedParticipant(pub ParticipantProfile);

impl Deref for AuthenticatedParticipant {
    type Target = ParticipantProfile;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub(crate) fn authenticate(
    req: &HttpRequest,
    fallback_token: Option<&str>,
) -> Result<ParticipantProfile, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or(AppError::Internal)?;

    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token);

    let token = from_header
        .or(fallback_token)
        .ok_or_else(|| AppError::Unauthorized("bearer token missing".into()))?;

    state.jwt.verify(token)
}

impl FromRequest for AuthenticatedParticipant {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req, None).map(AuthenticatedParticipant))
    }
}
