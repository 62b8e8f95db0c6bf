//! Authentication stage: API-key, JWT bearer, and HMAC signed-request.
//!
//! On success the handler populates the `user_*` context namespace
//! (`user_id`, plus claims for bearer tokens) for the limiter and the
//! access log. Missing or invalid credentials abort with `401`; valid
//! credentials on an unacceptable request (stale signature) abort `403`.

use crate::models::error::GatewayError;
use crate::models::settings::{AuthMode, AuthSettings};
use crate::pipeline::{Context, Handler};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashSet;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the caller identity for HMAC-signed requests.
const CLIENT_ID_HEADER: &str = "X-Client-Id";

/// JWT claim set accepted by the bearer mode.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
    pub iss: Option<String>,
    pub aud: Option<String>,
    pub roles: Option<Vec<String>>,
}

enum AuthVariant {
    ApiKey {
        header: String,
        keys: HashSet<String>,
    },
    Bearer {
        decoding_key: DecodingKey,
        validation: Validation,
        required_claims: Vec<String>,
    },
    Hmac {
        header: String,
        timestamp_header: String,
        secret: Vec<u8>,
        max_skew_secs: i64,
    },
}

/// Authentication pipeline stage.
pub struct AuthHandler {
    variant: AuthVariant,
}

impl AuthHandler {
    pub fn new(settings: &AuthSettings) -> Result<Self, String> {
        settings.validate()?;
        let variant = match &settings.mode {
            AuthMode::ApiKey { header, keys } => AuthVariant::ApiKey {
                header: header.clone(),
                keys: keys.iter().cloned().collect(),
            },
            AuthMode::Bearer {
                secret,
                issuer,
                audience,
                required_claims,
            } => {
                let mut validation = Validation::new(Algorithm::HS256);
                if let Some(issuer) = issuer {
                    validation.set_issuer(&[issuer]);
                }
                if let Some(audience) = audience {
                    validation.set_audience(&[audience]);
                }
                AuthVariant::Bearer {
                    decoding_key: DecodingKey::from_secret(secret.as_ref()),
                    validation,
                    required_claims: required_claims.clone(),
                }
            }
            AuthMode::Hmac {
                header,
                timestamp_header,
                secret,
                max_skew_secs,
            } => AuthVariant::Hmac {
                header: header.clone(),
                timestamp_header: timestamp_header.clone(),
                secret: secret.as_bytes().to_vec(),
                max_skew_secs: *max_skew_secs,
            },
        };
        Ok(Self { variant })
    }

    fn header_value<'a>(ctx: &'a Context, name: &str) -> Option<&'a str> {
        ctx.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn check_api_key(
        ctx: &Context,
        header: &str,
        keys: &HashSet<String>,
    ) -> Result<String, GatewayError> {
        let presented = Self::header_value(ctx, header).ok_or(GatewayError::Unauthorized {
            reason: format!("Missing {} header", header),
        })?;
        if !keys.contains(presented) {
            return Err(GatewayError::Unauthorized {
                reason: "Unknown API key".to_string(),
            });
        }
        // Identify the caller by a digest, never by the key itself.
        Ok(format!("key:{}", key_digest(presented)))
    }

    fn check_bearer(
        ctx: &Context,
        decoding_key: &DecodingKey,
        validation: &Validation,
        required_claims: &[String],
    ) -> Result<Claims, GatewayError> {
        let auth_header =
            Self::header_value(ctx, "Authorization").ok_or(GatewayError::Unauthorized {
                reason: "Missing Authorization header".to_string(),
            })?;
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(GatewayError::Unauthorized {
                reason: "Authorization header must start with 'Bearer '".to_string(),
            })?;

        let token_data =
            decode::<Claims>(token, decoding_key, validation).map_err(|e| {
                GatewayError::Unauthorized {
                    reason: format!("Token validation failed: {}", e),
                }
            })?;
        let claims = token_data.claims;

        for required in required_claims {
            let present = match required.as_str() {
                "roles" => claims.roles.is_some(),
                "iss" => claims.iss.is_some(),
                "aud" => claims.aud.is_some(),
                "sub" => !claims.sub.is_empty(),
                "exp" => true, // enforced by the decoder
                other => {
                    debug!("unknown required claim: {}", other);
                    true
                }
            };
            if !present {
                return Err(GatewayError::Unauthorized {
                    reason: format!("Missing required '{}' claim", required),
                });
            }
        }
        Ok(claims)
    }

    fn check_hmac(
        ctx: &Context,
        header: &str,
        timestamp_header: &str,
        secret: &[u8],
        max_skew_secs: i64,
    ) -> Result<String, GatewayError> {
        let signature = Self::header_value(ctx, header).ok_or(GatewayError::Unauthorized {
            reason: format!("Missing {} header", header),
        })?;
        let timestamp =
            Self::header_value(ctx, timestamp_header).ok_or(GatewayError::Unauthorized {
                reason: format!("Missing {} header", timestamp_header),
            })?;
        let client_id =
            Self::header_value(ctx, CLIENT_ID_HEADER).ok_or(GatewayError::Unauthorized {
                reason: format!("Missing {} header", CLIENT_ID_HEADER),
            })?;

        let ts: i64 = timestamp.parse().map_err(|_| GatewayError::Unauthorized {
            reason: "Malformed signature timestamp".to_string(),
        })?;
        let now = chrono::Utc::now().timestamp();
        if (now - ts).abs() > max_skew_secs {
            // Credentials are well-formed; the request itself is stale.
            return Err(GatewayError::Forbidden {
                reason: "Signature timestamp outside accepted window".to_string(),
            });
        }

        let sig_bytes = hex::decode(signature).map_err(|_| GatewayError::Unauthorized {
            reason: "Malformed signature".to_string(),
        })?;

        let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| GatewayError::Config {
            message: "HMAC secret rejected".to_string(),
        })?;
        mac.update(Self::string_to_sign(client_id, ctx.method.as_str(), &ctx.path, ts).as_bytes());
        mac.verify_slice(&sig_bytes)
            .map_err(|_| GatewayError::Unauthorized {
                reason: "Signature mismatch".to_string(),
            })?;

        Ok(client_id.to_string())
    }

    /// Canonical string covered by the request signature.
    pub fn string_to_sign(client_id: &str, method: &str, path: &str, timestamp: i64) -> String {
        format!("{}\n{}\n{}\n{}", client_id, method, path, timestamp)
    }

    /// Computes the hex signature for a request; used by clients and tests.
    pub fn sign(secret: &[u8], client_id: &str, method: &str, path: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(Self::string_to_sign(client_id, method, path, timestamp).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Short stable identifier for an API key, safe to log.
fn key_digest(key: &str) -> String {
    use sha2::Digest;
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..8])
}

#[async_trait]
impl Handler for AuthHandler {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(&self, ctx: &mut Context) -> bool {
        let outcome = match &self.variant {
            AuthVariant::ApiKey { header, keys } => {
                Self::check_api_key(ctx, header, keys).map(|user| (user, None))
            }
            AuthVariant::Bearer {
                decoding_key,
                validation,
                required_claims,
            } => Self::check_bearer(ctx, decoding_key, validation, required_claims)
                .map(|claims| (claims.sub.clone(), claims.roles)),
            AuthVariant::Hmac {
                header,
                timestamp_header,
                secret,
                max_skew_secs,
            } => Self::check_hmac(ctx, header, timestamp_header, secret, *max_skew_secs)
                .map(|user| (user, None)),
        };

        match outcome {
            Ok((user_id, roles)) => {
                debug!("authenticated request {} as {}", ctx.request_id, user_id);
                ctx.set("user_id", user_id);
                if let Some(roles) = roles {
                    ctx.set("user_roles", roles.join(","));
                }
                true
            }
            Err(err) => {
                warn!("authentication failed for {}: {}", ctx.request_id, err);
                ctx.abort_with(&err);
                false
            }
        }
    }
}

/// Helper to mint JWTs for tests and local tooling.
pub fn create_test_token(claims: &Claims, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    use jsonwebtoken::{encode, EncodingKey, Header};
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}
