use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
    pub refresh_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl JwtConfig {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::new(secret.as_bytes().to_vec()),
            exp_hours: 24,
            refresh_days: 7,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;
        let refresh_days = std::env::var("JWT_REFRESH_DAYS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(7))
            .map_err(|_| AppError::configuration("JWT_REFRESH_DAYS must be a valid integer"))?;

        Ok(Self {
            secret: Arc::new(secret.into_bytes()),
            exp_hours,
            refresh_days,
        })
    }

    pub fn encode(&self, user_id: Uuid, kind: TokenKind) -> Result<String, AppError> {
        let now = Utc::now();
        let exp = match kind {
            TokenKind::Access => now + Duration::hours(self.exp_hours),
            TokenKind::Refresh => now + Duration::days(self.refresh_days),
        };

        let claims = Claims {
            sub: user_id,
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
            kind,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access: self.encode(user_id, TokenKind::Access)?,
            refresh: self.encode(user_id, TokenKind::Refresh)?,
        })
    }

    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let claims = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))?;

        if claims.kind != expected {
            return Err(AppError::token("wrong token type"));
        }

        Ok(claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    pub kind: TokenKind,
}

/// Identity proven by a bearer access token. Role and tenant are loaded
/// separately by [`crate::authz::Principal`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.config.jwt.decode(token, TokenKind::Access)?;

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let jwt = JwtConfig::new("unit-secret");
        let user_id = Uuid::new_v4();
        let pair = jwt.issue_pair(user_id).unwrap();

        assert_eq!(jwt.decode(&pair.access, TokenKind::Access).unwrap().sub, user_id);
        assert_eq!(jwt.decode(&pair.refresh, TokenKind::Refresh).unwrap().sub, user_id);
        assert!(jwt.decode(&pair.refresh, TokenKind::Access).is_err());
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let token = JwtConfig::new("a").encode(Uuid::new_v4(), TokenKind::Access).unwrap();
        assert!(JwtConfig::new("b").decode(&token, TokenKind::Access).is_err());
    }
}
