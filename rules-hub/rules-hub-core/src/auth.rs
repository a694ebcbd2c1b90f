use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    pub sub: String,
}

/// Maps a bearer token onto the user identity the access gate evaluates.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Claims>;
}

pub struct Hs256Verifier {
    key: DecodingKey,
}

impl Hs256Verifier {
    pub fn new(secret: String) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

#[async_trait]
impl TokenVerifier for Hs256Verifier {
    async fn verify(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        decode::<Claims>(token, &self.key, &validation)
            .ok()
            .map(|d| d.claims)
    }
}
