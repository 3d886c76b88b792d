//! Structured query keys and invalidation patterns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resource names shared by the query cache, the REST route table and the
/// event invalidation table.
pub mod resources {
    pub const NOTIFICATIONS: &str = "notifications";
    pub const UNREAD_COUNT: &str = "unread-count";
    pub const MESSAGES: &str = "messages";
    pub const DASHBOARD: &str = "dashboard";
    pub const INVOICES: &str = "invoices";
    pub const DOCUMENTS: &str = "documents";
    pub const WORKFLOWS: &str = "workflows";
    pub const TASKS: &str = "tasks";
    pub const CLIENTS: &str = "clients";
    pub const CANDIDATES: &str = "candidates";
    pub const PIPELINE: &str = "pipeline";
    pub const INTERVIEWS: &str = "interviews";
    pub const OFFERS: &str = "offers";
    pub const JOBS: &str = "jobs";
}

/// Key of one cached query: a resource name plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    resource: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
}

impl QueryKey {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}

impl From<&str> for QueryKey {
    fn from(resource: &str) -> Self {
        Self::new(resource)
    }
}

/// Matches every key of one resource whose params contain the pattern's
/// params. A pattern without params matches the whole resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPattern {
    resource: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
}

impl KeyPattern {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: BTreeMap::new(),
        }
    }

    /// Pattern matching exactly the given key and its refinements.
    pub fn key(key: &QueryKey) -> Self {
        Self {
            resource: key.resource.clone(),
            params: key.params.clone(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        self.resource == key.resource
            && self
                .params
                .iter()
                .all(|(name, value)| key.params.get(name) == Some(value))
    }
}

impl From<&str> for KeyPattern {
    fn from(resource: &str) -> Self {
        Self::resource(resource)
    }
}

impl From<&QueryKey> for KeyPattern {
    fn from(key: &QueryKey) -> Self {
        Self::key(key)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", QueryKey {
            resource: self.resource.clone(),
            params: self.params.clone(),
        })?;
        f.write_str("*")
    }
}
