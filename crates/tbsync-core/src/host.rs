//! Typed wrappers for the commands the TbSync host serves.

use std::sync::{Arc, Weak};

use serde_json::{Map, Value, json};

use crate::{Channel, RpcError, strings};

/// Client for the host side of a [`Channel`].
///
/// Holds a weak reference so a provider can keep one while its command table
/// is registered on the same channel.
#[derive(Clone, Debug)]
pub struct HostClient {
    channel: Weak<Channel>,
}

impl HostClient {
    pub fn new(channel: &Arc<Channel>) -> Self {
        Self {
            channel: Arc::downgrade(channel),
        }
    }

    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.upgrade()
    }

    pub async fn call(&self, command: &str, parameters: Vec<Value>) -> Result<Option<Value>, RpcError> {
        let channel = self.channel.upgrade().ok_or(RpcError::NotConnected)?;
        channel.call(command, parameters).await
    }

    // Account properties

    pub async fn get_account_property(
        &self,
        account_id: &str,
        property: &str,
    ) -> Result<Option<Value>, RpcError> {
        self.call("getAccountProperty", vec![json!(account_id), json!(property)])
            .await
    }

    pub async fn set_account_property(
        &self,
        account_id: &str,
        property: &str,
        value: Value,
    ) -> Result<Option<Value>, RpcError> {
        self.call(
            "setAccountProperty",
            vec![json!(account_id), json!(property), value],
        )
        .await
    }

    pub async fn reset_account_property(
        &self,
        account_id: &str,
        property: &str,
    ) -> Result<Option<Value>, RpcError> {
        self.call("resetAccountProperty", vec![json!(account_id), json!(property)])
            .await
    }

    /// `None` asks for every property of the account.
    pub async fn get_account_properties(
        &self,
        account_id: &str,
        properties: Option<&[&str]>,
    ) -> Result<Option<Value>, RpcError> {
        let mut parameters = vec![json!(account_id)];
        if let Some(properties) = properties {
            parameters.push(json!(properties));
        }
        self.call("getAccountProperties", parameters).await
    }

    pub async fn set_account_properties(
        &self,
        account_id: &str,
        properties: Map<String, Value>,
    ) -> Result<Option<Value>, RpcError> {
        self.call(
            "setAccountProperties",
            vec![json!(account_id), Value::Object(properties)],
        )
        .await
    }

    pub async fn reset_account_properties(
        &self,
        account_id: &str,
        properties: &[&str],
    ) -> Result<Option<Value>, RpcError> {
        self.call(
            "resetAccountProperties",
            vec![json!(account_id), json!(properties)],
        )
        .await
    }

    // Folder properties

    pub async fn get_folder_property(
        &self,
        account_id: &str,
        folder_id: &str,
        property: &str,
    ) -> Result<Option<Value>, RpcError> {
        self.call(
            "getFolderProperty",
            vec![json!(account_id), json!(folder_id), json!(property)],
        )
        .await
    }

    pub async fn set_folder_property(
        &self,
        account_id: &str,
        folder_id: &str,
        property: &str,
        value: Value,
    ) -> Result<Option<Value>, RpcError> {
        self.call(
            "setFolderProperty",
            vec![json!(account_id), json!(folder_id), json!(property), value],
        )
        .await
    }

    pub async fn reset_folder_property(
        &self,
        account_id: &str,
        folder_id: &str,
        property: &str,
    ) -> Result<Option<Value>, RpcError> {
        self.call(
            "resetFolderProperty",
            vec![json!(account_id), json!(folder_id), json!(property)],
        )
        .await
    }

    /// `None` asks for every property of the folder.
    pub async fn get_folder_properties(
        &self,
        account_id: &str,
        folder_id: &str,
        properties: Option<&[&str]>,
    ) -> Result<Option<Value>, RpcError> {
        let mut parameters = vec![json!(account_id), json!(folder_id)];
        if let Some(properties) = properties {
            parameters.push(json!(properties));
        }
        self.call("getFolderProperties", parameters).await
    }

    pub async fn set_folder_properties(
        &self,
        account_id: &str,
        folder_id: &str,
        properties: Map<String, Value>,
    ) -> Result<Option<Value>, RpcError> {
        self.call(
            "setFolderProperties",
            vec![json!(account_id), json!(folder_id), Value::Object(properties)],
        )
        .await
    }

    pub async fn reset_folder_properties(
        &self,
        account_id: &str,
        folder_id: &str,
        properties: &[&str],
    ) -> Result<Option<Value>, RpcError> {
        self.call(
            "resetFolderProperties",
            vec![json!(account_id), json!(folder_id), json!(properties)],
        )
        .await
    }

    // Accounts and folders

    pub async fn get_all_folders(&self, account_id: &str) -> Result<Option<Value>, RpcError> {
        self.call("getAllFolders", vec![json!(account_id)]).await
    }

    /// Folders whose properties match `folder_query`, optionally restricted
    /// to accounts matching `account_query`.
    pub async fn find_folders(
        &self,
        folder_query: Map<String, Value>,
        account_query: Option<Map<String, Value>>,
    ) -> Result<Option<Value>, RpcError> {
        let mut parameters = vec![Value::Object(folder_query)];
        if let Some(account_query) = account_query {
            parameters.push(Value::Object(account_query));
        }
        self.call("findFolders", parameters).await
    }

    pub async fn create_new_folder(
        &self,
        account_id: &str,
        properties: Map<String, Value>,
    ) -> Result<Option<Value>, RpcError> {
        self.call(
            "createNewFolder",
            vec![json!(account_id), Value::Object(properties)],
        )
        .await
    }

    pub async fn add_account(
        &self,
        properties: Map<String, Value>,
    ) -> Result<Option<Value>, RpcError> {
        self.call("addAccount", vec![Value::Object(properties)]).await
    }

    pub async fn get_all_accounts(&self) -> Result<Option<Value>, RpcError> {
        self.call("getAllAccounts", vec![]).await
    }

    // Strings

    /// Localized string for `key`; see [`strings::resolve`].
    pub async fn get_string(&self, key: &str) -> String {
        let Some(channel) = self.channel.upgrade() else {
            return key.to_owned();
        };
        let runtime = channel.runtime().clone();
        strings::resolve(
            key,
            |base| runtime.local_string(base),
            |base| {
                let client = self.clone();
                let base = base.to_owned();
                async move {
                    match client.call("getString", vec![json!(base)]).await {
                        Ok(Some(Value::String(s))) => Some(s),
                        Ok(_) => None,
                        Err(e) => {
                            tracing::debug!(key = %base, error = %e, "remote string lookup failed");
                            None
                        }
                    }
                }
            },
        )
        .await
    }
}
