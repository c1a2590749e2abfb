//! Provider preferences.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ConfigError;

/// Preference set established at startup.
///
/// Field names on disk follow the add-on's storage keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub maxitems: u32,
    /// Connection timeout in milliseconds.
    pub timeout: u64,
    #[serde(rename = "clientID.type")]
    pub client_id_type: String,
    #[serde(rename = "clientID.useragent")]
    pub client_id_useragent: String,
    #[serde(rename = "enforceUniqueCalendarUrls")]
    pub enforce_unique_calendar_urls: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            maxitems: 50,
            timeout: 90000,
            client_id_type: "TbSync".to_owned(),
            client_id_useragent: "Thunderbird CalDAV/CardDAV".to_owned(),
            enforce_unique_calendar_urls: false,
        }
    }
}

impl Preferences {
    /// Read a JSON object of overrides; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Preference by its storage key.
    pub fn get(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn defaults_match_the_add_on() {
        let prefs = Preferences::default();
        assert_eq!(prefs.get("maxitems"), Some(json!(50)));
        assert_eq!(prefs.get("timeout"), Some(json!(90000)));
        assert_eq!(prefs.get("clientID.type"), Some(json!("TbSync")));
        assert_eq!(
            prefs.get("clientID.useragent"),
            Some(json!("Thunderbird CalDAV/CardDAV"))
        );
        assert_eq!(prefs.get("enforceUniqueCalendarUrls"), Some(json!(false)));
        assert_eq!(prefs.get("nope"), None);
    }

    #[test]
    fn file_overrides_single_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"timeout": 30000, "clientID.type": "Custom"}}"#).unwrap();

        let prefs = Preferences::load(file.path()).unwrap();
        assert_eq!(prefs.timeout, 30000);
        assert_eq!(prefs.client_id_type, "Custom");
        assert_eq!(prefs.maxitems, 50);
    }

    #[test]
    fn broken_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "timeout=5").unwrap();
        assert!(matches!(
            Preferences::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Preferences::load(Path::new("/nonexistent/prefs.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
