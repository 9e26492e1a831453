use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use crate::api::Claims;

/// Validate a bearer token issued by the identity service. Tokens naming
/// the nil id are rejected.
pub fn decode_claims(token: &str, secret: &str) -> Option<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    (!token_data.claims.sub.is_nil()).then_some(token_data.claims)
}

/// The principal named by a valid token.
pub fn decode_token(token: &str, secret: &str) -> Option<Uuid> {
    decode_claims(token, secret).map(|claims| claims.sub)
}
