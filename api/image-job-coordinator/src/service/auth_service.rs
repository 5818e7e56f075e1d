use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

const JWT_ISSUER: &str = "carousel-image-jobs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

pub fn issue_access_token(
    user_id: &str,
    jwt_secret: &str,
    ttl_seconds: i64,
) -> Result<(String, i64), String> {
    if user_id.trim().is_empty() {
        return Err("user id is required".to_string());
    }
    if ttl_seconds <= 0 {
        return Err("token ttl must be positive".to_string());
    }
    let iat = Utc::now().timestamp();
    let exp = iat
        .checked_add(ttl_seconds)
        .ok_or_else(|| "invalid jwt expiration".to_string())?;
    let claims = UserClaims {
        sub: user_id.to_string(),
        iat,
        exp,
        iss: JWT_ISSUER.to_string(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| format!("jwt issue failed: {e}"))?;
    Ok((token, exp))
}

pub fn verify_access_token(token: &str, jwt_secret: &str) -> Result<UserClaims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[JWT_ISSUER]);
    let data = decode::<UserClaims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| format!("jwt verify failed: {e}"))?;
    if data.claims.sub.trim().is_empty() {
        return Err("jwt subject is empty".to_string());
    }
    Ok(data.claims)
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
