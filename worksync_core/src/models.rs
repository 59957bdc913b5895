use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Host used when the settings record carries no base URL.
pub const DEFAULT_SOURCE_BASE_URL: &str = "https://dev.azure.com";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
}

/// Identifier of the (singleton) tracker connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for ConnectionId {
    type Err = IdParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| IdParseError::InvalidUuid(s.to_string()))?;
        Ok(Self(id))
    }
}

/// Tracker connection configuration. Edited by the settings surface, read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub organization: String,
    pub project: String,
    /// Area path filter (UNDER semantics). Blank means "resolve from team, else no filter".
    pub area_path: String,
    pub team_name: Option<String>,
    pub team_id: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    #[tracing::instrument(level = "debug")]
    pub fn new(
        organization: impl Into<String> + fmt::Debug,
        project: impl Into<String> + fmt::Debug,
        area_path: impl Into<String> + fmt::Debug,
        enabled: bool,
        now: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let organization = organization.into().trim().to_string();
        if organization.is_empty() {
            return Err(Error::InvalidInput("organization is empty".to_string()));
        }
        let project = project.into().trim().to_string();
        if project.is_empty() {
            return Err(Error::InvalidInput("project is empty".to_string()));
        }

        let now = now.unwrap_or_else(Utc::now);
        Ok(Self {
            id: ConnectionId::new(),
            organization,
            project,
            area_path: area_path.into().trim().to_string(),
            team_name: None,
            team_id: None,
            enabled,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_team(mut self, team_name: Option<String>, team_id: Option<String>) -> Self {
        self.team_name = team_name.filter(|s| !s.trim().is_empty());
        self.team_id = team_id.filter(|s| !s.trim().is_empty());
        self
    }

    /// Team reference the source understands: id when known, else name.
    pub fn team_ref(&self) -> Option<&str> {
        self.team_id.as_deref().or(self.team_name.as_deref())
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// Global settings record for the tracker integration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub base_url: Option<String>,
}

impl SourceSettings {
    /// Base URL without a trailing slash, falling back to the public host.
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SOURCE_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_rejects_blank_project() {
        let err = Connection::new("contoso", "  ", "", true, None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn team_ref_prefers_id() {
        let conn = Connection::new("contoso", "Fabrikam", "", true, None)
            .unwrap()
            .with_team(Some("Platform".into()), Some("team-42".into()));
        assert_eq!(conn.team_ref(), Some("team-42"));

        let conn = conn.with_team(Some("Platform".into()), Some(" ".into()));
        assert_eq!(conn.team_ref(), Some("Platform"));
    }

    #[test]
    fn base_url_defaults_when_unset_or_blank() {
        assert_eq!(
            SourceSettings::default().effective_base_url(),
            "https://dev.azure.com"
        );
        let s = SourceSettings {
            base_url: Some("   ".into()),
        };
        assert_eq!(s.effective_base_url(), "https://dev.azure.com");
        let s = SourceSettings {
            base_url: Some("https://tfs.example.com/collections/".into()),
        };
        assert_eq!(s.effective_base_url(), "https://tfs.example.com/collections");
    }
}
