use jsonwebtoken::{DecodingKey, Validation, decode};

use crate::models::Claims;

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

/// Mint a token the way the identity provider does. Tests only.
#[cfg(test)]
pub fn issue_token(uid: &str, name: &str, email: &str, secret: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken::{EncodingKey, Header, encode};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize;
    let claims = Claims {
        sub: uid.to_string(),
        name: Some(name.to_string()),
        email: Some(email.to_string()),
        exp: now + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
