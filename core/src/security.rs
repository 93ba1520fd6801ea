//! Database security object (`/{db}/_security`).
//!
//! CouchDB returns `{}` for a database that never had security configured,
//! so both groups and both of their lists default to empty. Any other
//! top-level field is carried through untouched so a read/modify/write cycle
//! does not drop settings this crate does not model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One side of a security object: user names and role names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SecurityGroup {
    pub fn contains_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Add `name` and `roles`, skipping anything already present. Returns
    /// whether the group changed.
    pub fn add(&mut self, name: &str, roles: &[String]) -> bool {
        let mut changed = false;
        if !self.contains_name(name) {
            self.names.push(name.to_string());
            changed = true;
        }
        for role in roles {
            if !self.roles.contains(role) {
                self.roles.push(role.clone());
                changed = true;
            }
        }
        changed
    }

    /// Remove `name` together with the listed `roles`. A name that is not in
    /// the group leaves the group untouched. Remaining entries end up sorted.
    pub fn remove(&mut self, name: &str, roles: &[String]) -> bool {
        if !self.contains_name(name) {
            return false;
        }
        self.names.retain(|n| n != name);
        self.roles.retain(|r| !roles.contains(r));
        self.names.sort();
        self.roles.sort();
        true
    }

    pub fn add_role(&mut self, role: &str) -> bool {
        if self.roles.iter().any(|r| r == role) {
            return false;
        }
        self.roles.push(role.to_string());
        true
    }

    pub fn remove_role(&mut self, role: &str) -> bool {
        let before = self.roles.len();
        self.roles.retain(|r| r != role);
        before != self.roles.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityDocument {
    #[serde(default)]
    pub admins: SecurityGroup,
    #[serde(default)]
    pub members: SecurityGroup,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}
