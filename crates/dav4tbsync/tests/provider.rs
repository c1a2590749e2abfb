use std::sync::Arc;
use std::time::Duration;

use dav4tbsync::{DavProvider, Preferences};
use serde_json::{Value, json};
use tbsync_core::{Channel, ChannelConfig, DEFAULT_HOST_ID, Envelope, HostClient, Request};
use tbsync_testkit::{EXTENSION_BASE, HostPeer, MemPortFactory, MockRuntime, connect_host};

fn acl_strings(runtime: MockRuntime) -> MockRuntime {
    runtime
        .with_string("acl.readonly", "Read-only")
        .with_string("acl.readwrite", "Read/write (##replace.1##)")
        .with_string("acl.modify", "modify")
        .with_string("acl.add", "add")
        .with_string("acl.delete", "delete")
        .with_string("acl.none", "none")
}

async fn provider_with(runtime: MockRuntime, prefs: Preferences) -> (Arc<Channel>, HostPeer) {
    let channel = Channel::new(ChannelConfig::default(), Arc::new(runtime.clone()));
    let provider = DavProvider::new(HostClient::new(&channel), Arc::new(runtime), prefs);
    channel.register(provider.command_table()).await.unwrap();
    let host = connect_host::<MemPortFactory>(&channel).unwrap();
    (channel, host)
}

async fn provider() -> (Arc<Channel>, HostPeer) {
    provider_with(acl_strings(MockRuntime::without_host()), Preferences::default()).await
}

fn url(path: &str) -> Value {
    json!(format!("{EXTENSION_BASE}{path}"))
}

fn account() -> Value {
    json!({
        "accountID": "account1",
        "folders": {
            "f1": {"type": "caldav", "foldername": "Work", "shared": false, "acl": "15"},
            "f2": {"type": "carddav", "foldername": "Contacts", "shared": false, "acl": "6"},
            "f3": {"type": "caldav", "foldername": "Team", "shared": true, "acl": ""},
            "f4": {"type": "ics", "foldername": "Holidays", "shared": false, "acl": 1},
        }
    })
}

// ============================================================================
// Description
// ============================================================================

#[tokio::test]
async fn provider_name_prefers_bundled_strings() {
    let runtime = MockRuntime::without_host().with_string("menu.name", "CalDAV & CardDAV");
    let (_channel, host) = provider_with(runtime, Preferences::default()).await;
    assert_eq!(
        host.request("getProviderName", vec![]).await.unwrap(),
        Some(json!("CalDAV & CardDAV"))
    );
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn provider_name_falls_back_to_the_host() {
    let (_channel, host) = provider().await;
    host.respond_to("getString", json!("DAV"));
    assert_eq!(
        host.request("getProviderName", vec![]).await.unwrap(),
        Some(json!("DAV"))
    );
    assert_eq!(
        host.calls(),
        vec![Request::new("getString", vec![json!("menu.name")])]
    );
}

#[tokio::test]
async fn constant_descriptions() {
    let (_channel, host) = provider().await;
    assert_eq!(host.request("getApiVersion", vec![]).await.unwrap(), Some(json!("3.0")));
    assert_eq!(
        host.request("getMaintainerEmail", vec![]).await.unwrap(),
        Some(json!("john.bieling@gmx.de"))
    );
    assert_eq!(
        host.request("getContributorsUrl", vec![]).await.unwrap(),
        Some(json!("https://github.com/jobisoft/DAV-4-TbSync/blob/master/CONTRIBUTORS.md"))
    );
    assert_eq!(
        host.request("getCreateAccountWindowUrl", vec![]).await.unwrap(),
        Some(url("content/manager/createAccount.xhtml"))
    );
    assert_eq!(
        host.request("getEditAccountOverlayUrl", vec![]).await.unwrap(),
        Some(url("content/manager/editAccountOverlay.xhtml"))
    );

    let sponsors = host.request("getSponsors", vec![]).await.unwrap().unwrap();
    assert_eq!(sponsors["Biebl, Michael"]["description"], json!("Nextcloud"));
    assert_eq!(sponsors.as_object().unwrap().len(), 4);
}

#[tokio::test]
async fn provider_icon_sizes() {
    let (_channel, host) = provider().await;
    for (size, file) in [
        (json!(16), "sabredav16.png"),
        (json!(32), "sabredav32.png"),
        (json!(64), "sabredav48.png"),
        (json!("16"), "sabredav48.png"),
    ] {
        assert_eq!(
            host.request("getProviderIcon", vec![size]).await.unwrap(),
            Some(url(&format!("content/skin/{file}")))
        );
    }
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn provider_icon_follows_the_service_provider() {
    let (_channel, host) = provider().await;
    host.respond_to("getAccountProperty", json!("gmx.net"));
    assert_eq!(
        host.request("getProviderIcon", vec![json!(16), json!("account1")])
            .await
            .unwrap(),
        Some(url("content/skin/gmx16.png"))
    );
    assert_eq!(
        host.calls(),
        vec![Request::new(
            "getAccountProperty",
            vec![json!("account1"), json!("serviceprovider")]
        )]
    );

    host.respond_to("getAccountProperty", json!("nextcloud"));
    assert_eq!(
        host.request("getProviderIcon", vec![json!(32), json!("account2")])
            .await
            .unwrap(),
        Some(url("content/skin/sabredav32.png"))
    );
}

#[tokio::test(start_paused = true)]
async fn announce_describes_the_provider() {
    let runtime = MockRuntime::new().with_string("menu.name", "CalDAV & CardDAV");
    let channel = Channel::new(
        ChannelConfig::default().with_legacy_provider_tag(dav4tbsync::LEGACY_PROVIDER_TAG),
        Arc::new(runtime.clone()),
    );
    let provider = DavProvider::new(
        HostClient::new(&channel),
        Arc::new(runtime.clone()),
        Preferences::default(),
    );
    channel.register(provider.command_table()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let (target, message) = runtime.announces().into_iter().next().unwrap();
    assert_eq!(target, DEFAULT_HOST_ID);
    assert_eq!(
        serde_json::to_value(message).unwrap(),
        json!({
            "command": "InitiateConnect",
            "provider": "dav",
            "info": {
                "name": "CalDAV & CardDAV",
                "icon16": format!("{EXTENSION_BASE}content/skin/sabredav16.png"),
                "apiVersion": "3.0",
            }
        })
    );
}

// ============================================================================
// Accounts
// ============================================================================

#[tokio::test]
async fn default_rows() {
    let (_channel, host) = provider().await;
    let account = host
        .request("getDefaultAccountEntries", vec![])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account["calDavPrincipal"], Value::Null);
    assert_eq!(account["useCalendarCache"], json!(true));
    assert_eq!(account["serviceproviderRevision"], json!(0));

    let folder = host
        .request("getDefaultFolderEntries", vec![])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(folder["https"], json!(true));
    assert_eq!(folder["createdWithProviderVersion"], json!("0"));
}

#[tokio::test]
async fn enabling_an_account_resets_its_principals() {
    let (_channel, host) = provider().await;
    assert_eq!(
        host.request("onEnableAccount", vec![json!("account1")])
            .await
            .unwrap(),
        Some(Value::Null)
    );
    assert_eq!(
        host.calls(),
        vec![Request::new(
            "resetAccountProperties",
            vec![json!("account1"), json!(["calDavPrincipal", "cardDavPrincipal"])]
        )]
    );

    host.request("onDisableAccount", vec![json!("account1")])
        .await
        .unwrap();
    host.request("onDeleteAccount", vec![json!("account1")])
        .await
        .unwrap();
    assert_eq!(host.calls().len(), 1);
}

#[tokio::test]
async fn connection_timeout_comes_from_preferences() {
    let prefs = Preferences {
        timeout: 30000,
        ..Preferences::default()
    };
    let (_channel, host) = provider_with(MockRuntime::without_host(), prefs).await;
    assert_eq!(
        host.request("getConnectionTimeout", vec![json!("account1")])
            .await
            .unwrap(),
        Some(json!(30000))
    );
}

#[tokio::test]
async fn sync_reports_success() {
    let (_channel, host) = provider().await;
    let expected = json!({"version": "3.0", "type": "success", "message": "", "details": ""});
    let params = vec![json!({"accountID": "account1"}), json!("sync"), json!(1)];
    assert_eq!(
        host.request("syncFolderList", params.clone()).await.unwrap(),
        Some(expected.clone())
    );
    assert_eq!(host.request("syncFolder", params).await.unwrap(), Some(expected));
}

// ============================================================================
// Folder list
// ============================================================================

#[tokio::test]
async fn sorted_folders_from_an_account_object() {
    let (_channel, host) = provider().await;
    let rows = host
        .request("getSortedFolders", vec![account()])
        .await
        .unwrap()
        .unwrap();
    let rows = rows.as_array().unwrap();

    let keys: Vec<&str> = rows.iter().map(|r| r["key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["100Contacts", "101Work", "102Holidays", "201Team"]);

    assert_eq!(
        rows[0],
        json!({
            "key": "100Contacts",
            "accountID": "account1",
            "folderID": "f2",
            "typeImage": "content/skin/contacts16.png",
            "folderDisplayName": "Contacts",
            "attributesRoAcl": {"label": "Read-only"},
            "attributesRwAcl": {"label": "Read/write (modify, add)", "disabled": true},
        })
    );
    assert_eq!(rows[1]["attributesRwAcl"], json!({"label": "Read/write (modify, add, delete)", "disabled": false}));
    assert_eq!(rows[2]["typeImage"], url("content/skin/ics16.png"));
    assert_eq!(rows[2]["attributesRwAcl"]["label"], json!("Read/write (none)"));
    assert_eq!(rows[3]["typeImage"], json!("content/skin/calendar16_shared.png"));
}

#[tokio::test]
async fn sorted_folders_from_an_account_id() {
    let (_channel, host) = provider().await;
    host.respond_to(
        "getAllFolders",
        json!({
            "f1": {"type": "caldav", "foldername": "B", "shared": false, "acl": "7"},
            "f2": {"type": "caldav", "foldername": "A", "shared": false, "acl": "7"},
        }),
    );
    let rows = host
        .request("getSortedFolders", vec![json!("account1")])
        .await
        .unwrap()
        .unwrap();
    let ids: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["folderID"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["f2", "f1"]);
    assert_eq!(
        host.calls()[0],
        Request::new("getAllFolders", vec![json!("account1")])
    );
}

#[tokio::test]
async fn per_folder_commands() {
    let (_channel, host) = provider().await;
    let params = |folder: &str| vec![account(), json!(folder)];

    assert_eq!(
        host.request("getTypeImage", params("f3")).await.unwrap(),
        Some(json!("content/skin/calendar16_shared.png"))
    );
    assert_eq!(
        host.request("getFolderDisplayName", params("f4")).await.unwrap(),
        Some(json!("Holidays"))
    );
    assert_eq!(
        host.request("getAttributesRoAcl", params("f1")).await.unwrap(),
        Some(json!({"label": "Read-only"}))
    );
    assert_eq!(
        host.request("getAttributesRwAcl", params("f3")).await.unwrap(),
        Some(json!({"label": "Read/write (none)", "disabled": true}))
    );
    assert_eq!(
        host.request("onContextMenuShowing", params("f1")).await.unwrap(),
        Some(Value::Null)
    );
}

#[tokio::test]
async fn unknown_folder_leaves_the_request_unanswered() {
    let (channel, host) = provider().await;
    let request = Request::new("getTypeImage", vec![account(), json!("missing")]);
    host.post(&Envelope::new(DEFAULT_HOST_ID, 100, Some(request.into_value())))
        .await
        .unwrap();

    assert_eq!(
        host.request("getApiVersion", vec![]).await.unwrap(),
        Some(json!("3.0"))
    );
    assert!(channel.is_connected());
}
