//! Account and folder rows as the host sends them, and the folder list view
//! built from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tbsync_core::HandlerError;

pub const ACL_MODIFY: i64 = 0x2;
pub const ACL_ADD: i64 = 0x4;
pub const ACL_DELETE: i64 = 0x8;
const ACL_FULL: i64 = 0x7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderType {
    CardDav,
    CalDav,
    Ics,
    Other,
}

impl FolderType {
    pub fn parse(s: &str) -> Self {
        match s {
            "carddav" => Self::CardDav,
            "caldav" => Self::CalDav,
            "ics" => Self::Ics,
            _ => Self::Other,
        }
    }

    fn sort_rank(self) -> u32 {
        match self {
            Self::CardDav => 0,
            Self::CalDav => 1,
            Self::Ics => 2,
            Self::Other => 9,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Folder {
    #[serde(rename = "type")]
    pub folder_type: String,
    pub shared: bool,
    pub foldername: String,
    /// ACL bits from the server, stored as a string or a number.
    pub acl: Value,
}

impl Folder {
    pub fn kind(&self) -> FolderType {
        FolderType::parse(&self.folder_type)
    }

    /// Folder list sort key: type rank (shared folders last) then name.
    pub fn sort_key(&self) -> String {
        let mut rank = 100 + self.kind().sort_rank();
        if self.shared {
            rank += 100;
        }
        format!("{rank}{}", self.foldername)
    }

    /// ACL as an integer; anything unparsable counts as no rights.
    pub fn acl_bits(&self) -> i64 {
        parse_int(&self.acl).unwrap_or(0)
    }
}

/// Account with its folders, keyed by folder ID.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AccountObject {
    #[serde(rename = "accountID")]
    pub account_id: String,
    #[serde(default)]
    pub folders: BTreeMap<String, Folder>,
}

impl AccountObject {
    pub fn from_value(value: &Value) -> Result<Self, HandlerError> {
        Ok(Self::deserialize(value)?)
    }

    pub fn folder(&self, folder_id: &str) -> Result<&Folder, HandlerError> {
        self.folders.get(folder_id).ok_or_else(|| {
            HandlerError::new(format!(
                "account {} has no folder {folder_id}",
                self.account_id
            ))
        })
    }
}

/// Folders as returned by the host's `getAllFolders`: either a map keyed by
/// folder ID or a list of rows carrying `folderID`.
pub fn folders_from_host(value: Option<Value>) -> Result<BTreeMap<String, Folder>, HandlerError> {
    match value {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(id, row)| -> Result<_, HandlerError> { Ok((id, Folder::deserialize(row)?)) })
            .collect(),
        Some(Value::Array(rows)) => rows
            .into_iter()
            .map(|row| -> Result<_, HandlerError> {
                let id = row
                    .get("folderID")
                    .and_then(Value::as_str)
                    .ok_or_else(|| HandlerError::new("folder row without folderID"))?
                    .to_owned();
                Ok((id, Folder::deserialize(row)?))
            })
            .collect(),
        Some(other) => Err(HandlerError::new(format!(
            "unexpected folder list from host: {other}"
        ))),
    }
}

/// One row of the folder list view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderRow {
    pub key: String,
    #[serde(rename = "accountID")]
    pub account_id: String,
    #[serde(rename = "folderID")]
    pub folder_id: String,
    #[serde(rename = "typeImage")]
    pub type_image: Option<String>,
    #[serde(rename = "folderDisplayName")]
    pub folder_display_name: String,
    #[serde(rename = "attributesRoAcl")]
    pub attributes_ro_acl: Value,
    #[serde(rename = "attributesRwAcl")]
    pub attributes_rw_acl: Value,
}

/// Leading integer of `value`, the way the host's `parseInt` reads it.
fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let (negative, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s.strip_prefix('+').unwrap_or(s)),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            let n: i64 = digits[..end].parse().ok()?;
            Some(if negative { -n } else { n })
        }
        _ => None,
    }
}

/// String keys naming the rights in `acl`.
pub fn acl_right_keys(acl: i64) -> Vec<&'static str> {
    let mut keys = Vec::new();
    if acl & ACL_MODIFY != 0 {
        keys.push("acl.modify");
    }
    if acl & ACL_ADD != 0 {
        keys.push("acl.add");
    }
    if acl & ACL_DELETE != 0 {
        keys.push("acl.delete");
    }
    if keys.is_empty() {
        keys.push("acl.none");
    }
    keys
}

/// The read-write menu entry is disabled unless all of 0x1..0x4 are set.
pub fn acl_rw_disabled(acl: i64) -> bool {
    acl & ACL_FULL != ACL_FULL
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn folder(kind: &str, shared: bool, name: &str) -> Folder {
        Folder {
            folder_type: kind.into(),
            shared,
            foldername: name.into(),
            acl: Value::Null,
        }
    }

    #[test]
    fn sort_keys_group_by_type_then_shared() {
        assert_eq!(folder("carddav", false, "Contacts").sort_key(), "100Contacts");
        assert_eq!(folder("caldav", false, "Work").sort_key(), "101Work");
        assert_eq!(folder("ics", false, "Holidays").sort_key(), "102Holidays");
        assert_eq!(folder("tasks", false, "Todo").sort_key(), "109Todo");
        assert_eq!(folder("caldav", true, "Team").sort_key(), "201Team");
    }

    #[test]
    fn acl_parses_like_parse_int() {
        assert_eq!(parse_int(&json!("15")), Some(15));
        assert_eq!(parse_int(&json!("  7abc")), Some(7));
        assert_eq!(parse_int(&json!(6)), Some(6));
        assert_eq!(parse_int(&json!("")), None);
        assert_eq!(parse_int(&json!("x1")), None);
        assert_eq!(parse_int(&Value::Null), None);
    }

    #[test]
    fn acl_rights() {
        assert_eq!(acl_right_keys(0xF), vec!["acl.modify", "acl.add", "acl.delete"]);
        assert_eq!(acl_right_keys(0x1), vec!["acl.none"]);
        assert!(!acl_rw_disabled(0x7));
        assert!(!acl_rw_disabled(0xF));
        assert!(acl_rw_disabled(0xE));
        assert!(acl_rw_disabled(0));
    }

    #[test]
    fn account_object_from_host() {
        let account = AccountObject::from_value(&json!({
            "accountID": "account1",
            "folders": {
                "f1": {"type": "caldav", "foldername": "Work", "shared": false, "acl": "15", "href": "/cal/"},
            }
        }))
        .unwrap();
        assert_eq!(account.account_id, "account1");
        assert_eq!(account.folder("f1").unwrap().acl_bits(), 15);
        assert!(account.folder("f2").is_err());
    }

    #[test]
    fn folder_lists_in_both_shapes() {
        let by_id = folders_from_host(Some(json!({"f1": {"type": "ics", "foldername": "A"}}))).unwrap();
        assert_eq!(by_id["f1"].kind(), FolderType::Ics);

        let rows = folders_from_host(Some(json!([
            {"folderID": "f2", "type": "carddav", "foldername": "B"}
        ])))
        .unwrap();
        assert_eq!(rows["f2"].foldername, "B");

        assert!(folders_from_host(None).unwrap().is_empty());
        assert!(folders_from_host(Some(json!([{"type": "ics"}]))).is_err());
    }
}
