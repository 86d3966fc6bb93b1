//! CI service domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// A repository registered with the CI provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    /// Project reference understood by the CI provider (numeric id or path)
    pub gitlab_repo_id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role a service plays inside a pipeline unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Macro,
    Micro,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Macro => "macro",
            ServiceKind::Micro => "micro",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "macro" => Ok(ServiceKind::Macro),
            "micro" => Ok(ServiceKind::Micro),
            other => Err(format!("unknown service type: {}", other)),
        }
    }
}
