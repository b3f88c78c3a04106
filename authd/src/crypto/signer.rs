use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use ed25519_dalek::{pkcs8::EncodePrivateKey, SigningKey};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    /// Every verification failure collapses into this one variant.
    #[error("invalid token")]
    Invalid,

    #[error("signing key error: {0}")]
    Key(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Tenant ID
    pub tid: String,
    pub scope: String,
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated principal extracted from a valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessSubject {
    pub subject: String,
    pub tenant_id: String,
}

/// Public half of the signing key in JWK form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Ed25519 access-token signer.
#[derive(Clone)]
pub struct TokenSigner {
    kid: String,
    x: String,
    issuer: String,
    audience: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenSigner {
    /// Signer over a freshly generated key with a random `kid`.
    pub fn generate(issuer: &str, audience: &str) -> Result<Self, TokenError> {
        let signing_key = SigningKey::generate(&mut OsRng);

        let mut kid = [0u8; 8];
        OsRng.fill_bytes(&mut kid);

        Self::build(signing_key, URL_SAFE_NO_PAD.encode(kid), issuer, audience)
    }

    /// Signer over a fixed 32-byte seed. The `kid` is derived from the public
    /// key so it survives restarts.
    pub fn from_seed(seed: &[u8; 32], issuer: &str, audience: &str) -> Result<Self, TokenError> {
        let signing_key = SigningKey::from_bytes(seed);
        let digest = Sha256::digest(signing_key.verifying_key().as_bytes());
        let kid = URL_SAFE_NO_PAD.encode(&digest[..8]);

        Self::build(signing_key, kid, issuer, audience)
    }

    fn build(
        signing_key: SigningKey,
        kid: String,
        issuer: &str,
        audience: &str,
    ) -> Result<Self, TokenError> {
        let der = signing_key
            .to_pkcs8_der()
            .map_err(|e| TokenError::Key(e.to_string()))?;
        let encoding_key = EncodingKey::from_ed_der(der.as_bytes());

        let x = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().as_bytes());
        let decoding_key =
            DecodingKey::from_ed_components(&x).map_err(|e| TokenError::Key(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = 0;

        tracing::info!(kid = %kid, "Token signer initialized with Ed25519 key");

        Ok(Self {
            kid,
            x,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            encoding_key,
            decoding_key,
            validation,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn issue_access(
        &self,
        subject: &str,
        tenant_id: &str,
        scope: &str,
        jti: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: subject.to_string(),
            tid: tenant_id.to_string(),
            scope: scope.to_string(),
            jti: jti.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());

        encode(&header, &claims, &self.encoding_key).map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn parse_access(&self, token: &str) -> Result<AccessSubject, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Invalid);
        }

        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| TokenError::Invalid)?;
        let claims = data.claims;

        if claims.sub.is_empty() || claims.tid.is_empty() {
            return Err(TokenError::Invalid);
        }

        Ok(AccessSubject {
            subject: claims.sub,
            tenant_id: claims.tid,
        })
    }

    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: vec![Jwk {
                kty: "OKP".to_string(),
                crv: "Ed25519".to_string(),
                x: self.x.clone(),
                kid: self.kid.clone(),
                alg: "EdDSA".to_string(),
                key_use: "sig".to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::decode_header;

    const ISSUER: &str = "http://localhost:8080";
    const AUDIENCE: &str = "authd";

    fn signer() -> TokenSigner {
        TokenSigner::generate(ISSUER, AUDIENCE).unwrap()
    }

    #[test]
    fn issued_token_parses_back() {
        let signer = signer();
        let token = signer
            .issue_access("user-1", "tenant-1", "openid profile", "jti-1", Duration::minutes(15))
            .unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::EdDSA);
        assert_eq!(header.kid.as_deref(), Some(signer.kid()));

        let subject = signer.parse_access(&token).unwrap();
        assert_eq!(subject.subject, "user-1");
        assert_eq!(subject.tenant_id, "tenant-1");
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = signer();
        let token = signer
            .issue_access("user-1", "tenant-1", "openid profile", "jti-1", Duration::seconds(-60))
            .unwrap();

        assert!(matches!(signer.parse_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn token_from_another_key_is_rejected() {
        let token = signer()
            .issue_access("user-1", "tenant-1", "openid profile", "jti-1", Duration::minutes(15))
            .unwrap();

        assert!(matches!(signer().parse_access(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn issuer_and_audience_are_enforced() {
        let seed = [7u8; 32];
        let issuing = TokenSigner::from_seed(&seed, ISSUER, AUDIENCE).unwrap();
        let token = issuing
            .issue_access("user-1", "tenant-1", "openid profile", "jti-1", Duration::minutes(15))
            .unwrap();

        let other_issuer = TokenSigner::from_seed(&seed, "https://elsewhere", AUDIENCE).unwrap();
        let other_audience = TokenSigner::from_seed(&seed, ISSUER, "billing").unwrap();

        assert!(other_issuer.parse_access(&token).is_err());
        assert!(other_audience.parse_access(&token).is_err());
        assert!(issuing.parse_access(&token).is_ok());
    }

    #[test]
    fn empty_tenant_claim_is_rejected() {
        let signer = signer();
        let token = signer
            .issue_access("user-1", "", "openid profile", "jti-1", Duration::minutes(15))
            .unwrap();

        assert!(signer.parse_access(&token).is_err());
        assert!(signer.parse_access("").is_err());
        assert!(signer.parse_access("a.b.c").is_err());
    }

    #[test]
    fn non_eddsa_token_is_rejected() {
        let signer = signer();
        let claims = AccessClaims {
            sub: "user-1".to_string(),
            tid: "tenant-1".to_string(),
            scope: "openid profile".to_string(),
            jti: "jti-1".to_string(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        assert!(signer.parse_access(&token).is_err());
    }

    #[test]
    fn seeded_signer_has_stable_kid() {
        let seed = [42u8; 32];
        let a = TokenSigner::from_seed(&seed, ISSUER, AUDIENCE).unwrap();
        let b = TokenSigner::from_seed(&seed, ISSUER, AUDIENCE).unwrap();
        assert_eq!(a.kid(), b.kid());
        assert_eq!(a.jwks(), b.jwks());
    }

    #[test]
    fn jwks_exposes_public_key_only() {
        let signer = signer();
        let jwks = serde_json::to_value(signer.jwks()).unwrap();
        let key = &jwks["keys"][0];

        assert_eq!(key["kty"], "OKP");
        assert_eq!(key["crv"], "Ed25519");
        assert_eq!(key["alg"], "EdDSA");
        assert_eq!(key["use"], "sig");
        assert_eq!(key["kid"], signer.kid());
        assert!(key.get("d").is_none());
        assert_eq!(URL_SAFE_NO_PAD.decode(key["x"].as_str().unwrap()).unwrap().len(), 32);
    }
}
