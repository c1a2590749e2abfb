//! The CalDAV/CardDAV provider: everything TbSync may ask of it.

use std::future::Future;
use std::sync::Arc;

use serde_json::{Value, json};
use tbsync_core::{CommandResult, CommandTable, HandlerError, HostClient, Params, Runtime};

use crate::folders::{self, AccountObject, Folder, FolderRow, FolderType};
use crate::prefs::Preferences;
use crate::status::StatusData;

pub const API_VERSION: &str = "3.0";
pub const MAINTAINER_EMAIL: &str = "john.bieling@gmx.de";
pub const CONTRIBUTORS_URL: &str =
    "https://github.com/jobisoft/DAV-4-TbSync/blob/master/CONTRIBUTORS.md";
const DEFAULT_ICON: &str = "sabredav";

/// Known service providers and the icon each one uses.
pub const SERVICE_PROVIDER_ICONS: &[(&str, &str)] = &[
    ("fruux", "fruux"),
    ("mbo", "mbo"),
    ("icloud", "icloud"),
    ("google", "google"),
    ("gmx.net", "gmx"),
    ("gmx.com", "gmx"),
    ("posteo", "posteo"),
    ("web.de", "web"),
    ("yahoo", "yahoo"),
];

fn service_provider_icon(serviceprovider: &str) -> Option<&'static str> {
    SERVICE_PROVIDER_ICONS
        .iter()
        .find(|(id, _)| *id == serviceprovider)
        .map(|(_, icon)| *icon)
}

pub struct DavProvider {
    host: HostClient,
    runtime: Arc<dyn Runtime>,
    prefs: Preferences,
}

impl std::fmt::Debug for DavProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavProvider")
            .field("prefs", &self.prefs)
            .finish_non_exhaustive()
    }
}

impl DavProvider {
    pub fn new(host: HostClient, runtime: Arc<dyn Runtime>, prefs: Preferences) -> Arc<Self> {
        Arc::new(Self {
            host,
            runtime,
            prefs,
        })
    }

    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    /// Command table to register with the channel.
    pub fn command_table(self: &Arc<Self>) -> CommandTable {
        CommandTable::builder()
            .command("onConnect", self.bind(Self::on_connect))
            .command("onDisconnect", self.bind(Self::on_disconnect))
            .command("getProviderName", self.bind(Self::get_provider_name))
            .command("getApiVersion", self.bind(Self::get_api_version))
            .command("getProviderIcon", self.bind(Self::get_provider_icon))
            .command("getSponsors", self.bind(Self::get_sponsors))
            .command("getContributorsUrl", self.bind(Self::get_contributors_url))
            .command("getMaintainerEmail", self.bind(Self::get_maintainer_email))
            .command("getCreateAccountWindowUrl", self.bind(Self::get_create_account_window_url))
            .command("getEditAccountOverlayUrl", self.bind(Self::get_edit_account_overlay_url))
            .command("getDefaultAccountEntries", self.bind(Self::get_default_account_entries))
            .command("getDefaultFolderEntries", self.bind(Self::get_default_folder_entries))
            .command("onEnableAccount", self.bind(Self::on_enable_account))
            .command("onDisableAccount", self.bind(Self::on_disable_account))
            .command("onDeleteAccount", self.bind(Self::on_delete_account))
            .command("getSortedFolders", self.bind(Self::get_sorted_folders))
            .command("getConnectionTimeout", self.bind(Self::get_connection_timeout))
            .command("syncFolderList", self.bind(Self::sync_folder_list))
            .command("syncFolder", self.bind(Self::sync_folder))
            .command("onContextMenuShowing", self.bind(Self::on_context_menu_showing))
            .command("getTypeImage", self.bind(Self::get_type_image))
            .command("getFolderDisplayName", self.bind(Self::get_folder_display_name))
            .command("getAttributesRoAcl", self.bind(Self::get_attributes_ro_acl))
            .command("getAttributesRwAcl", self.bind(Self::get_attributes_rw_acl))
            .build()
    }

    fn bind<F, Fut>(self: &Arc<Self>, method: F) -> impl Fn(Params) -> Fut + Send + Sync + 'static
    where
        F: Fn(Arc<Self>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        let provider = self.clone();
        move |params| method(provider.clone(), params)
    }

    // ========================================================================
    // Connection
    // ========================================================================

    async fn on_connect(self: Arc<Self>, _params: Params) -> CommandResult {
        tracing::info!("TbSync established connection with the DAV provider");
        Ok(Value::Null)
    }

    async fn on_disconnect(self: Arc<Self>, _params: Params) -> CommandResult {
        tracing::info!("TbSync lost connection with the DAV provider");
        Ok(Value::Null)
    }

    // ========================================================================
    // Provider description
    // ========================================================================

    async fn get_provider_name(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(json!(self.host.get_string("menu.name").await))
    }

    async fn get_api_version(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(json!(API_VERSION))
    }

    /// `(size, accountID?)`: 16 and 32 pick those sizes, anything else 48.
    async fn get_provider_icon(self: Arc<Self>, params: Params) -> CommandResult {
        let size = match params.get(0).and_then(Value::as_f64) {
            Some(s) if s == 16.0 => 16,
            Some(s) if s == 32.0 => 32,
            _ => 48,
        };

        let mut root = DEFAULT_ICON;
        if let Some(account_id) = params
            .get(1)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        {
            let serviceprovider = self
                .host
                .get_account_property(account_id, "serviceprovider")
                .await?;
            if let Some(icon) = serviceprovider
                .as_ref()
                .and_then(Value::as_str)
                .and_then(service_provider_icon)
            {
                root = icon;
            }
        }

        Ok(json!(self
            .runtime
            .extension_url(&format!("content/skin/{root}{size}.png"))))
    }

    async fn get_sponsors(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(json!({
            "Thoben, Marc": {"name": "Marc Thoben", "description": "Zimbra", "icon": "", "link": ""},
            "Biebl, Michael": {"name": "Michael Biebl", "description": "Nextcloud", "icon": "", "link": ""},
            "László, Kovács": {"name": "Kovács László", "description": "Radicale", "icon": "", "link": ""},
            "Lütticke, David": {"name": "David Lütticke", "description": "", "icon": "", "link": ""},
        }))
    }

    async fn get_contributors_url(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(json!(CONTRIBUTORS_URL))
    }

    async fn get_maintainer_email(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(json!(MAINTAINER_EMAIL))
    }

    async fn get_create_account_window_url(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(json!(self
            .runtime
            .extension_url("content/manager/createAccount.xhtml")))
    }

    async fn get_edit_account_overlay_url(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(json!(self
            .runtime
            .extension_url("content/manager/editAccountOverlay.xhtml")))
    }

    // ========================================================================
    // Database rows
    // ========================================================================

    async fn get_default_account_entries(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(json!({
            "useCalendarCache": true,
            "calDavHost": "",
            "cardDavHost": "",
            // Must stay null until discovered.
            "calDavPrincipal": null,
            "cardDavPrincipal": null,
            "calDavOptions": [],
            "cardDavOptions": [],
            "serviceprovider": "",
            "serviceproviderRevision": 0,
            "user": "",
            "createdWithProviderVersion": "0",
            "syncGroups": false,
        }))
    }

    async fn get_default_folder_entries(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(json!({
            // Folders of one account may live on different servers.
            "href": "",
            "https": true,
            "fqdn": "",
            "url": "",
            "type": "",
            "shared": false,
            "acl": "",
            "target": "",
            "targetColor": "",
            "targetName": "",
            "ctag": "",
            "token": "",
            "createdWithProviderVersion": "0",
        }))
    }

    // ========================================================================
    // Account lifecycle
    // ========================================================================

    async fn on_enable_account(self: Arc<Self>, params: Params) -> CommandResult {
        let account_id: String = params.arg(0)?;
        tracing::info!(account_id = %account_id, "account enabled; forgetting principals");
        self.host
            .reset_account_properties(&account_id, &["calDavPrincipal", "cardDavPrincipal"])
            .await?;
        Ok(Value::Null)
    }

    async fn on_disable_account(self: Arc<Self>, params: Params) -> CommandResult {
        let account_id: Option<String> = params.opt_arg(0)?;
        tracing::info!(account_id = ?account_id, "account disabled");
        Ok(Value::Null)
    }

    async fn on_delete_account(self: Arc<Self>, params: Params) -> CommandResult {
        let account_id: Option<String> = params.opt_arg(0)?;
        tracing::info!(account_id = ?account_id, "account deleted");
        Ok(Value::Null)
    }

    async fn get_connection_timeout(self: Arc<Self>, _params: Params) -> CommandResult {
        self.prefs
            .get("timeout")
            .ok_or_else(|| HandlerError::new("timeout preference missing"))
    }

    // ========================================================================
    // Sync
    // ========================================================================

    async fn sync_folder_list(self: Arc<Self>, params: Params) -> CommandResult {
        tracing::debug!(run = ?params.get(2), "syncFolderList");
        Ok(serde_json::to_value(StatusData::success())?)
    }

    async fn sync_folder(self: Arc<Self>, params: Params) -> CommandResult {
        tracing::debug!(run = ?params.get(2), "syncFolder");
        Ok(serde_json::to_value(StatusData::success())?)
    }

    // ========================================================================
    // Folder list
    // ========================================================================

    /// `(accountObject | accountID)`: rows for the folder list, sorted.
    async fn get_sorted_folders(self: Arc<Self>, params: Params) -> CommandResult {
        let account = match params.get(0) {
            Some(Value::String(account_id)) => {
                let folders = self.host.get_all_folders(account_id).await?;
                AccountObject {
                    account_id: account_id.clone(),
                    folders: folders::folders_from_host(folders)?,
                }
            }
            Some(value) => AccountObject::from_value(value)?,
            None => return Err(HandlerError::new("missing parameter #0")),
        };

        let mut rows = Vec::with_capacity(account.folders.len());
        for (folder_id, folder) in &account.folders {
            rows.push(FolderRow {
                key: folder.sort_key(),
                account_id: account.account_id.clone(),
                folder_id: folder_id.clone(),
                type_image: self.type_image(folder),
                folder_display_name: folder.foldername.clone(),
                attributes_ro_acl: self.attributes_ro_acl().await,
                attributes_rw_acl: self.attributes_rw_acl(folder).await,
            });
        }
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(serde_json::to_value(rows)?)
    }

    async fn on_context_menu_showing(self: Arc<Self>, _params: Params) -> CommandResult {
        Ok(Value::Null)
    }

    async fn get_type_image(self: Arc<Self>, params: Params) -> CommandResult {
        let (account, folder_id) = account_and_folder(&params)?;
        Ok(json!(self.type_image(account.folder(&folder_id)?)))
    }

    async fn get_folder_display_name(self: Arc<Self>, params: Params) -> CommandResult {
        let (account, folder_id) = account_and_folder(&params)?;
        Ok(json!(account.folder(&folder_id)?.foldername))
    }

    async fn get_attributes_ro_acl(self: Arc<Self>, params: Params) -> CommandResult {
        let (account, folder_id) = account_and_folder(&params)?;
        account.folder(&folder_id)?;
        Ok(self.attributes_ro_acl().await)
    }

    async fn get_attributes_rw_acl(self: Arc<Self>, params: Params) -> CommandResult {
        let (account, folder_id) = account_and_folder(&params)?;
        Ok(self.attributes_rw_acl(account.folder(&folder_id)?).await)
    }

    /// Contacts and calendar icons come from TbSync itself (relative paths).
    fn type_image(&self, folder: &Folder) -> Option<String> {
        match (folder.kind(), folder.shared) {
            (FolderType::CardDav, false) => Some("content/skin/contacts16.png".to_owned()),
            (FolderType::CardDav, true) => Some("content/skin/contacts16_shared.png".to_owned()),
            (FolderType::CalDav, false) => Some("content/skin/calendar16.png".to_owned()),
            (FolderType::CalDav, true) => Some("content/skin/calendar16_shared.png".to_owned()),
            (FolderType::Ics, _) => Some(self.runtime.extension_url("content/skin/ics16.png")),
            (FolderType::Other, _) => None,
        }
    }

    async fn attributes_ro_acl(&self) -> Value {
        json!({ "label": self.host.get_string("acl.readonly").await })
    }

    async fn attributes_rw_acl(&self, folder: &Folder) -> Value {
        let acl = folder.acl_bits();
        let mut rights = Vec::new();
        for key in folders::acl_right_keys(acl) {
            rights.push(self.host.get_string(key).await);
        }
        let label = self
            .host
            .get_string(&format!("acl.readwrite::{}", rights.join(", ")))
            .await;
        json!({
            "label": label,
            "disabled": folders::acl_rw_disabled(acl),
        })
    }
}

fn account_and_folder(params: &Params) -> Result<(AccountObject, String), HandlerError> {
    let account = params
        .get(0)
        .ok_or_else(|| HandlerError::new("missing parameter #0"))?;
    Ok((AccountObject::from_value(account)?, params.arg(1)?))
}
