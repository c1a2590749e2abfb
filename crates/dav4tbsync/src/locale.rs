//! Bundled translations.
//!
//! Files use the WebExtension `messages.json` layout:
//! `{"menu.name": {"message": "CalDAV & CardDAV"}, ...}`.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::ConfigError;

const BUILTIN: &[(&str, &str)] = &[
    ("menu.name", "CalDAV & CardDAV"),
    ("acl.readonly", "Read-only access"),
    ("acl.readwrite", "Read and write (##replace.1##)"),
    ("acl.modify", "modify"),
    ("acl.add", "add"),
    ("acl.delete", "delete"),
    ("acl.none", "none"),
];

#[derive(Debug, Deserialize)]
struct Entry {
    message: String,
}

/// Translation table keyed by message name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Messages {
    entries: HashMap<String, String>,
}

impl Messages {
    /// The English strings this provider needs before the host is reachable.
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }

    /// Merge a `messages.json` file over the current entries.
    pub fn load_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let file: HashMap<String, Entry> =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            })?;
        tracing::debug!(path = %path.display(), count = file.len(), "loaded messages");
        self.entries
            .extend(file.into_iter().map(|(k, e)| (k, e.message)));
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_entries_override_builtin_ones() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"menu.name": {{"message": "CalDAV & CardDAV (de)", "description": "x"}}, "extra": {{"message": "E"}}}}"#
        )
        .unwrap();

        let messages = Messages::builtin().load_file(file.path()).unwrap();
        assert_eq!(messages.get("menu.name").as_deref(), Some("CalDAV & CardDAV (de)"));
        assert_eq!(messages.get("extra").as_deref(), Some("E"));
        assert_eq!(messages.get("acl.none").as_deref(), Some("none"));
        assert_eq!(messages.get("missing"), None);
    }
}
