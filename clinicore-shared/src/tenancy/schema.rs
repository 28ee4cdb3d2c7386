//! Typed schema identifiers
//!
//! Clinicore keeps platform data in the `public` schema and every tenant's
//! clinical data in its own `tenant_{id}` schema. Schema names cannot be
//! passed to PostgreSQL as bind parameters in DDL, so they only ever come from
//! this type: a [`SchemaName`] is either `public` or `tenant_` followed by a
//! positive integer, and nothing else parses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of every tenant schema
pub const TENANT_SCHEMA_PREFIX: &str = "tenant_";

/// Name of the shared platform schema
pub const PUBLIC_SCHEMA: &str = "public";

/// A PostgreSQL schema Clinicore is allowed to route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchemaName {
    /// Shared platform namespace (tenant registry, plans, billing ledger, FAQ)
    #[default]
    Public,

    /// Isolated namespace of a single tenant
    Tenant(i64),
}

/// Returned when a string is not a routable schema name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid schema name: {0:?}")]
pub struct InvalidSchemaName(pub String);

impl SchemaName {
    /// Schema of the given tenant (`tenant_{id}`)
    pub fn for_tenant(tenant_id: i64) -> Self {
        SchemaName::Tenant(tenant_id)
    }

    /// Whether this is the shared platform schema
    pub fn is_public(&self) -> bool {
        matches!(self, SchemaName::Public)
    }

    /// Tenant id for tenant schemas, `None` for `public`
    pub fn tenant_id(&self) -> Option<i64> {
        match self {
            SchemaName::Public => None,
            SchemaName::Tenant(id) => Some(*id),
        }
    }

    /// Double-quoted identifier for use in DDL (`"tenant_7"`)
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaName::Public => f.write_str(PUBLIC_SCHEMA),
            SchemaName::Tenant(id) => write!(f, "{}{}", TENANT_SCHEMA_PREFIX, id),
        }
    }
}

impl FromStr for SchemaName {
    type Err = InvalidSchemaName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == PUBLIC_SCHEMA {
            return Ok(SchemaName::Public);
        }

        let digits = s
            .strip_prefix(TENANT_SCHEMA_PREFIX)
            .ok_or_else(|| InvalidSchemaName(s.to_string()))?;

        // Reject signs, whitespace and leading zeros so that the textual form
        // round-trips exactly.
        if digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || (digits.len() > 1 && digits.starts_with('0'))
        {
            return Err(InvalidSchemaName(s.to_string()));
        }

        match digits.parse::<i64>() {
            Ok(id) if id > 0 => Ok(SchemaName::Tenant(id)),
            _ => Err(InvalidSchemaName(s.to_string())),
        }
    }
}

impl Serialize for SchemaName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(SchemaName::Public.to_string(), "public");
        assert_eq!(SchemaName::for_tenant(42).to_string(), "tenant_42");
        assert_eq!(SchemaName::for_tenant(7).quoted(), "\"tenant_7\"");
    }

    #[test]
    fn test_parse_valid() {
        assert_eq!("public".parse::<SchemaName>(), Ok(SchemaName::Public));
        assert_eq!("tenant_9".parse::<SchemaName>(), Ok(SchemaName::Tenant(9)));
        assert_eq!(
            "tenant_9000000001".parse::<SchemaName>(),
            Ok(SchemaName::Tenant(9_000_000_001))
        );
    }

    #[test]
    fn test_parse_rejects_injection_and_noise() {
        for bad in [
            "",
            "Public",
            "tenant_",
            "tenant_0",
            "tenant_007",
            "tenant_-1",
            "tenant_+1",
            "tenant_1 ",
            "tenant_1; DROP SCHEMA public",
            "tenant_1,public",
            "pg_catalog",
        ] {
            assert!(bad.parse::<SchemaName>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_tenant_id() {
        assert_eq!(SchemaName::Public.tenant_id(), None);
        assert_eq!(SchemaName::for_tenant(3).tenant_id(), Some(3));
        assert!(SchemaName::default().is_public());
    }

    #[test]
    fn test_serde_uses_textual_form() {
        let json = serde_json::to_string(&SchemaName::for_tenant(12)).unwrap();
        assert_eq!(json, "\"tenant_12\"");

        let parsed: SchemaName = serde_json::from_str("\"public\"").unwrap();
        assert_eq!(parsed, SchemaName::Public);

        assert!(serde_json::from_str::<SchemaName>("\"tenant_x\"").is_err());
    }
}
