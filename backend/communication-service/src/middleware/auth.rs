use crate::error::{AppError, AppResult};
use crate::models::{ParticipantProfile, ParticipantType};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Bearer token claims issued by the platform's identity tier.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Organisation id
    pub sub: String,
    /// Organisation display name
    #[serde(default)]
    pub name: String,
    /// `hospital`, `bloodbank` (or `blood_bank`), `admin`; others are refused
    pub role: String,
    pub exp: usize,
    pub iat: usize,
}

/// HS256 token verification.
#[derive(Clone)]
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Resolve a bearer token into the acting organisation.
    pub fn verify(&self, token: &str) -> AppResult<ParticipantProfile> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AppError::Unauthorized("token expired".into()),
                _ => AppError::Unauthorized("token invalid".into()),
            }
        })?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(AppError::Unauthorized("token invalid: empty subject".into()));
        }
        let participant_type = claims.role.parse::<ParticipantType>().map_err(|_| {
            AppError::Forbidden(format!("role {} may not use the ledger", claims.role))
        })?;
        let name = if claims.name.trim().is_empty() {
            claims.sub.clone()
        } else {
            claims.name
        };

        Ok(ParticipantProfile {
            id: claims.sub,
            name,
            participant_type,
        })
    }

    /// Mint a token; used by tooling and tests.
    pub fn issue(&self, profile: &ParticipantProfile, ttl_secs: usize) -> AppResult<String> {
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: profile.id.clone(),
            name: profile.name.clone(),
            role: profile.participant_type.as_str().to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Config(format!("jwt encoding failed: {e}")))
    }
}

/// Pull the token out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
