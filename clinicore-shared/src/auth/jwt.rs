/// Tenant-bound JWT access tokens
///
/// Tokens are HS256-signed and carry the user, the role and the tenant the
/// user belongs to. The tenant claim is either the string `"public"` for
/// platform operators or the numeric tenant id:
///
/// ```json
/// { "sub": 12, "tenant": 7, "role": "doctor", "iss": "clinicore", ... }
/// ```
///
/// A token is only honoured on hosts of its own tenant; the API compares the
/// claim with the tenant resolved from the `Host` header.
///
/// # Example
///
/// ```
/// use clinicore_shared::auth::jwt::{create_token, validate_token, Claims, TenantClaim};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let secret = "an-hs256-secret-of-at-least-32-bytes";
/// let token = create_token(&Claims::new(12, TenantClaim::Tenant(7), "doctor"), secret)?;
///
/// let claims = validate_token(&token, secret)?;
/// assert_eq!(claims.tenant, TenantClaim::Tenant(7));
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::tenancy::schema::SchemaName;

/// Issuer of every token
pub const ISSUER: &str = "clinicore";

/// Error type for JWT operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to create token: {0}")]
    CreateError(String),

    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    #[error("Token has expired")]
    Expired,
}

/// Tenant a token was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenantClaim {
    /// Platform operator on the main domain
    Public,
    Tenant(i64),
}

impl TenantClaim {
    /// Whether the token belongs to requests bound to `schema`
    pub fn matches(&self, schema: SchemaName) -> bool {
        match (self, schema) {
            (TenantClaim::Public, SchemaName::Public) => true,
            (TenantClaim::Tenant(id), SchemaName::Tenant(bound)) => *id == bound,
            _ => false,
        }
    }
}

impl From<SchemaName> for TenantClaim {
    fn from(schema: SchemaName) -> Self {
        match schema {
            SchemaName::Public => TenantClaim::Public,
            SchemaName::Tenant(id) => TenantClaim::Tenant(id),
        }
    }
}

impl fmt::Display for TenantClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantClaim::Public => f.write_str("public"),
            TenantClaim::Tenant(id) => write!(f, "{id}"),
        }
    }
}

impl Serialize for TenantClaim {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TenantClaim::Public => serializer.serialize_str("public"),
            TenantClaim::Tenant(id) => serializer.serialize_i64(*id),
        }
    }
}

impl<'de> Deserialize<'de> for TenantClaim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Id(id) if id > 0 => Ok(TenantClaim::Tenant(id)),
            Raw::Text(text) if text == "public" => Ok(TenantClaim::Public),
            Raw::Text(text) => match text.parse::<i64>() {
                Ok(id) if id > 0 => Ok(TenantClaim::Tenant(id)),
                _ => Err(serde::de::Error::custom(format!("invalid tenant claim {text:?}"))),
            },
            Raw::Id(id) => Err(serde::de::Error::custom(format!("invalid tenant id {id}"))),
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID within the tenant schema
    pub sub: i64,

    /// Always [`ISSUER`]
    pub iss: String,

    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,

    pub tenant: TenantClaim,

    /// Role name, e.g. `clinic_admin`
    pub role: String,
}

impl Claims {
    /// Claims valid for 24 hours from now
    pub fn new(user_id: i64, tenant: TenantClaim, role: impl Into<String>) -> Self {
        Self::with_expiration(user_id, tenant, role, Duration::hours(24))
    }

    pub fn with_expiration(
        user_id: i64,
        tenant: TenantClaim,
        role: impl Into<String>,
        expires_in: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            nbf: now.timestamp(),
            tenant,
            role: role.into(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// Signs claims with HS256
pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    let key = EncodingKey::from_secret(secret.as_bytes());

    encode(&Header::new(Algorithm::HS256), claims, &key)
        .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
}

/// Verifies signature, issuer, expiry and not-before, then returns the claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::ValidationError(format!("Token validation failed: {}", e)),
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    #[test]
    fn test_round_trip() {
        let claims = Claims::new(3, TenantClaim::Tenant(7), "nurse");
        let token = create_token(&claims, SECRET).unwrap();

        let validated = validate_token(&token, SECRET).unwrap();
        assert_eq!(validated, claims);
        assert!(!validated.is_expired());
    }

    #[test]
    fn test_wrong_secret() {
        let token = create_token(&Claims::new(1, TenantClaim::Public, "super_admin"), SECRET).unwrap();
        assert!(matches!(
            validate_token(&token, "another-secret-key-at-least-32-bytes"),
            Err(JwtError::ValidationError(_))
        ));
    }

    #[test]
    fn test_expired() {
        let claims =
            Claims::with_expiration(1, TenantClaim::Tenant(7), "doctor", Duration::seconds(-10));
        let token = create_token(&claims, SECRET).unwrap();

        assert!(matches!(validate_token(&token, SECRET), Err(JwtError::Expired)));
    }

    #[test]
    fn test_tenant_claim_wire_format() {
        let public = serde_json::to_value(TenantClaim::Public).unwrap();
        assert_eq!(public, serde_json::json!("public"));
        assert_eq!(serde_json::to_value(TenantClaim::Tenant(7)).unwrap(), serde_json::json!(7));

        let parsed: TenantClaim = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(parsed, TenantClaim::Tenant(42));
        assert!(serde_json::from_str::<TenantClaim>("0").is_err());
        assert!(serde_json::from_str::<TenantClaim>("\"tenant_7\"").is_err());
    }

    #[test]
    fn test_claim_matches_schema() {
        assert!(TenantClaim::Tenant(7).matches(SchemaName::for_tenant(7)));
        assert!(!TenantClaim::Tenant(7).matches(SchemaName::for_tenant(9)));
        assert!(!TenantClaim::Tenant(7).matches(SchemaName::Public));
        assert!(TenantClaim::Public.matches(SchemaName::Public));
        assert!(!TenantClaim::Public.matches(SchemaName::for_tenant(7)));
        assert_eq!(TenantClaim::from(SchemaName::for_tenant(5)), TenantClaim::Tenant(5));
    }
}
