use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_NAME: &str = "folio.collab.json";

/// Per-session collaboration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollabConfig {
    /// Display name broadcast through presence
    #[serde(default = "default_name")]
    pub name: String,

    /// Cursor color broadcast through presence
    #[serde(default = "default_color")]
    pub color: String,

    /// Name of the shared XML fragment holding the document root
    #[serde(default = "default_root_name")]
    pub root_name: String,

    /// Block inserted when a document would otherwise be left without children
    #[serde(default = "default_block_type")]
    pub default_block_type: String,

    /// Property names that are never replicated, for any node type
    #[serde(default)]
    pub excluded_properties: Vec<String>,

    /// Transaction origin used by an undo manager; batches carrying it are historic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historic_origin: Option<String>,
}

fn default_name() -> String {
    "anonymous".to_string()
}

fn default_color() -> String {
    "#3366ff".to_string()
}

fn default_root_name() -> String {
    "root".to_string()
}

fn default_block_type() -> String {
    "paragraph".to_string()
}

impl CollabConfig {
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Load config from a directory, falling back to defaults when absent
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = dir.as_ref().join(DEFAULT_CONFIG_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn with_identity(mut self, name: impl Into<String>, color: impl Into<String>) -> Self {
        self.name = name.into();
        self.color = color.into();
        self
    }
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            color: default_color(),
            root_name: default_root_name(),
            default_block_type: default_block_type(),
            excluded_properties: vec![],
            historic_origin: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r##"{
            "name": "Ada",
            "color": "#ff0000",
            "excludedProperties": ["indent"],
            "historicOrigin": "undo"
        }"##;

        let config = CollabConfig::from_json(json).unwrap();
        assert_eq!(config.name, "Ada");
        assert_eq!(config.color, "#ff0000");
        assert_eq!(config.root_name, "root");
        assert_eq!(config.default_block_type, "paragraph");
        assert_eq!(config.excluded_properties, vec!["indent"]);
        assert_eq!(config.historic_origin.as_deref(), Some("undo"));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = CollabConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(CollabConfig::load(dir.path()).unwrap(), CollabConfig::default());

        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_NAME),
            r#"{ "rootName": "doc", "defaultBlockType": "quote" }"#,
        )
        .unwrap();
        let config = CollabConfig::load(dir.path()).unwrap();
        assert_eq!(config.root_name, "doc");
        assert_eq!(config.default_block_type, "quote");
        assert_eq!(config.name, "anonymous");
    }
}
