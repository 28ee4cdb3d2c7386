//! Typed access policies for role tokens
//!
//! A policy is built from the tenant id and role name as data, never by
//! substituting into a policy template, so a role can only ever be granted
//! paths under its own tenant. Policies serialize to Vault's JSON policy
//! syntax:
//!
//! ```json
//! { "path": { "transit/decrypt/7-transit": { "capabilities": ["update"] } } }
//! ```

use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

use super::{transit_key_name, SecretStoreError};

/// Operation a policy may grant on a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Create,
    Read,
    Update,
    Delete,
    List,
}

const FULL_ACCESS: &[Capability] = &[
    Capability::Create,
    Capability::Read,
    Capability::Update,
    Capability::Delete,
    Capability::List,
];

/// Capabilities granted on one path
///
/// A path ending in `*` covers everything under that prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathRule {
    pub path: String,
    pub capabilities: Vec<Capability>,
}

impl PathRule {
    fn new(path: String, capabilities: &[Capability]) -> Self {
        Self {
            path,
            capabilities: capabilities.to_vec(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self.path.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => self.path == path,
        }
    }
}

/// Access policy of one (tenant, role) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    pub name: String,
    pub rules: Vec<PathRule>,
}

impl Policy {
    /// Whether any rule grants `capability` on `path`
    pub fn allows(&self, path: &str, capability: Capability) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.matches(path) && rule.capabilities.contains(&capability))
    }

    /// Vault JSON policy document
    pub fn document(&self) -> JsonValue {
        let mut paths = Map::new();
        for rule in &self.rules {
            paths.insert(
                rule.path.clone(),
                json!({ "capabilities": rule.capabilities }),
            );
        }
        json!({ "path": paths })
    }
}

/// Name under which a role's policy is stored
pub fn policy_name(tenant_id: i64, role: &str) -> String {
    format!("{role}-policy-{tenant_id}")
}

/// Transit path used to encrypt with the tenant's key
pub fn encrypt_path(tenant_id: i64) -> String {
    format!("transit/encrypt/{}", transit_key_name(tenant_id))
}

/// Transit path used to decrypt with the tenant's key
pub fn decrypt_path(tenant_id: i64) -> String {
    format!("transit/decrypt/{}", transit_key_name(tenant_id))
}

/// KV data prefix owned by the tenant
pub fn tenant_kv_prefix(tenant_id: i64) -> String {
    format!("kv/data/tenants/{tenant_id}")
}

/// Builds the least-privilege policy of `role` within `tenant_id`
///
/// | Role | Grants |
/// |---|---|
/// | `super_admin`, `clinic_admin` | all of the tenant's KV data, encrypt, decrypt |
/// | `doctor` | read/list patients, decrypt |
/// | `nurse` | read/list patients, read/update appointments, decrypt |
/// | `staff` | read/update appointments |
/// | `patient` | decrypt |
///
/// Role tokens are shared by every user holding the role, so no policy can
/// name a single patient record; record-level access for patients is checked
/// by the API, not the secret store.
///
/// # Errors
///
/// `UnknownRole` for any other role name, custom roles included.
pub fn policy_for(tenant_id: i64, role: &str) -> Result<Policy, SecretStoreError> {
    use Capability::*;

    let kv = tenant_kv_prefix(tenant_id);
    let encrypt = PathRule::new(encrypt_path(tenant_id), &[Update]);
    let decrypt = PathRule::new(decrypt_path(tenant_id), &[Update]);
    let patients = PathRule::new(format!("{kv}/patients/*"), &[Read, List]);
    let appointments = PathRule::new(format!("{kv}/appointments/*"), &[Read, Update]);

    let rules = match role {
        "super_admin" | "clinic_admin" => {
            vec![PathRule::new(format!("{kv}/*"), FULL_ACCESS), encrypt, decrypt]
        }
        "doctor" => vec![patients, decrypt],
        "nurse" => vec![patients, appointments, decrypt],
        "staff" => vec![appointments],
        "patient" => vec![decrypt],
        other => return Err(SecretStoreError::UnknownRole(other.to_string())),
    };

    Ok(Policy {
        name: policy_name(tenant_id, role),
        rules,
    })
}
