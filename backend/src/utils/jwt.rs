use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::models::actor::{Actor, ActorRole};

/// Claims of an actor token. Tokens are issued by the identity service; this
/// crate only verifies them (issuing is kept for tooling and tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // actor id
    #[serde(default)]
    pub role: String,
    pub exp: i64, // expiration time
    #[serde(default)]
    pub iat: i64, // issued at
}

impl Claims {
    pub fn new(actor_id: String, role: String, expiration_hours: u64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(expiration_hours as i64);

        Self {
            sub: actor_id,
            role,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.sub.clone(), ActorRole::parse_lenient(&self.role))
    }
}

pub fn create_access_token(
    actor_id: String,
    role: String,
    secret: &str,
    expiration_hours: u64,
) -> anyhow::Result<String> {
    let claims = Claims::new(actor_id, role, expiration_hours);
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(token)
}

pub fn verify_access_token(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let validation = Validation::default();
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;

    Ok(token_data.claims)
}
