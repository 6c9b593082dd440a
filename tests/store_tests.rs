mod common;

use std::fs::{self, OpenOptions};

use common::{store_options, temp_config_dir};
use config_model::{ChangeNote, Client, ConfigStore, Error, StoreOptions, store::tree};
use fs2::FileExt;
use serde_value::Value;

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

#[test]
fn test_get_set_delete() {
    let dir = temp_config_dir();
    let store = ConfigStore::open(store_options(&dir)).unwrap();
    let note = ChangeNote::new("Set hostname");

    assert_eq!(store.get("system/hostname", text("default")), text("default"));

    store.set("system/hostname", text("fw1"), &note).unwrap();
    assert_eq!(store.get("system/hostname", text("default")), text("fw1"));

    store.set("system/domain", text(""), &note).unwrap();
    assert_eq!(store.get("system/domain", text("home.arpa")), text("home.arpa"));
    assert_eq!(store.get_opt("system/domain"), Some(text("")));

    let removed = store.delete("system/hostname", &note).unwrap();
    assert_eq!(removed, Some(text("fw1")));
    assert_eq!(store.get_opt("system/hostname"), None);
    assert_eq!(store.delete("system/hostname", &note).unwrap(), None);
}

#[test]
fn test_enabled_checks_key_presence_only() {
    let dir = temp_config_dir();
    let store = ConfigStore::open(store_options(&dir)).unwrap();
    let note = ChangeNote::new("Toggle");

    assert!(!store.enabled("system/ssh", "enable"));
    store.set("system/ssh/enable", text(""), &note).unwrap();
    assert!(store.enabled("system/ssh", "enable"));
    assert!(!store.enabled("system/ssh/enable", "enable"));
}

#[test]
fn test_changes_survive_reopen() {
    let dir = temp_config_dir();
    let options = store_options(&dir);
    {
        let store = ConfigStore::open(options.clone()).unwrap();
        store
            .set("interfaces/wan/if", text("em0"), &ChangeNote::new("Assign WAN"))
            .unwrap();
    }

    let reopened = ConfigStore::open(options).unwrap();
    assert_eq!(reopened.get_opt("interfaces/wan/if"), Some(text("em0")));

    let contents = fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(contents.contains("em0"));
}

#[test]
fn test_reload_picks_up_other_writers() {
    let dir = temp_config_dir();
    let options = store_options(&dir);
    let first = ConfigStore::open(options.clone()).unwrap();
    let second = ConfigStore::open(options).unwrap();

    second
        .set("system/hostname", text("fw2"), &ChangeNote::new("Rename"))
        .unwrap();
    assert_eq!(first.get_opt("system/hostname"), None);

    first.reload().unwrap();
    assert_eq!(first.get_opt("system/hostname"), Some(text("fw2")));
    assert!(!first.refresh().unwrap());

    // writes start from the latest file contents
    second
        .set("system/domain", text("lab"), &ChangeNote::new("Domain"))
        .unwrap();
    first
        .set("system/timezone", text("UTC"), &ChangeNote::new("Timezone"))
        .unwrap();
    assert_eq!(first.get_opt("system/domain"), Some(text("lab")));

    assert!(second.refresh().unwrap());
    assert_eq!(second.get_opt("system/timezone"), Some(text("UTC")));
}

#[test]
fn test_write_fails_when_lock_is_held() {
    let dir = temp_config_dir();
    let options = store_options(&dir);
    let store = ConfigStore::open(options.clone()).unwrap();

    let mut lock_path = options.path.clone().into_os_string();
    lock_path.push(".lock");
    let holder = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .unwrap();
    FileExt::lock_exclusive(&holder).unwrap();

    let mut ran = false;
    let err = store
        .with_write_lock(&ChangeNote::new("Blocked"), |_| {
            ran = true;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, Error::LockExhausted { attempts: 3, .. }));
    assert_eq!(err.response_id(), "CONFIG_LOCK_EXHAUSTED");
    assert_eq!(err.code(), 500);
    assert!(!ran);

    FileExt::unlock(&holder).unwrap();
    store
        .set("system/hostname", text("fw1"), &ChangeNote::new("Unblocked"))
        .unwrap();
}

#[test]
fn test_failed_closure_writes_nothing() {
    let dir = temp_config_dir();
    let store = ConfigStore::open(store_options(&dir)).unwrap();

    let err = store
        .with_write_lock(&ChangeNote::new("Doomed").subsystem("system"), |tree| {
            tree::set(tree, "system/hostname", text("fw1"))?;
            Err::<(), _>(Error::validation("TEST_REJECTED", None, "rejected"))
        })
        .unwrap_err();
    assert_eq!(err.response_id(), "TEST_REJECTED");
    assert_eq!(store.get_opt("system/hostname"), None);
    assert!(store.audit_trail().is_empty());
    assert!(!store.is_dirty("system"));
}

#[test]
fn test_audit_trail_and_revision() {
    let dir = temp_config_dir();
    let store = ConfigStore::open(store_options(&dir)).unwrap();
    let admin = Client::new("admin", "198.51.100.7");

    store
        .set(
            "system/hostname",
            text("fw1"),
            &ChangeNote::new("Renamed host").client(admin.clone()),
        )
        .unwrap();
    store
        .set("system/domain", text("lab"), &ChangeNote::new("Set domain"))
        .unwrap();

    let trail = store.audit_trail();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].note, "Renamed host");
    assert_eq!(trail[0].username, "admin");
    assert_eq!(trail[1].username, Client::system().username);
    assert!(trail[0].time <= trail[1].time);

    assert_eq!(store.get_opt("revision/description"), Some(text("Set domain")));
    assert_eq!(store.get_opt("revision/username"), Some(text("(system)")));
}

#[test]
fn test_audit_trail_keeps_latest_entries() {
    let dir = temp_config_dir();
    let options = StoreOptions::builder()
        .path(dir.path().join("config.toml"))
        .audit_limit(2)
        .build()
        .unwrap();
    let store = ConfigStore::open(options).unwrap();

    for n in 0..4 {
        store
            .set(
                "system/hostname",
                text(&format!("fw{n}")),
                &ChangeNote::new(format!("Rename {n}")),
            )
            .unwrap();
    }

    let notes: Vec<String> = store.audit_trail().into_iter().map(|e| e.note).collect();
    assert_eq!(notes, vec!["Rename 2", "Rename 3"]);
}

#[test]
fn test_write_commits_when_dirty_marker_fails() {
    let dir = temp_config_dir();
    let not_a_dir = dir.path().join("markers");
    fs::write(&not_a_dir, "").unwrap();
    let options = StoreOptions::builder()
        .path(dir.path().join("config.toml"))
        .dirty_dir(not_a_dir.join("nested"))
        .build()
        .unwrap();
    let store = ConfigStore::open(options.clone()).unwrap();

    store
        .set(
            "unbound/enable",
            text(""),
            &ChangeNote::new("Enable resolver").subsystem("unbound"),
        )
        .unwrap();
    assert!(!store.is_dirty("unbound"));
    assert_eq!(store.audit_trail().len(), 1);

    let reopened = ConfigStore::open(options).unwrap();
    assert_eq!(reopened.get_opt("unbound/enable"), Some(text("")));
}

#[test]
fn test_dirty_markers() {
    let dir = temp_config_dir();
    let options = StoreOptions::builder()
        .path(dir.path().join("config.toml"))
        .dirty_dir(dir.path().join("markers"))
        .build()
        .unwrap();
    let store = ConfigStore::open(options).unwrap();

    assert!(!store.is_dirty("unbound"));
    store
        .set(
            "unbound/enable",
            text(""),
            &ChangeNote::new("Enable resolver").subsystem("unbound"),
        )
        .unwrap();
    assert!(store.is_dirty("unbound"));
    assert!(dir.path().join("markers/unbound.dirty").exists());

    store.clear_dirty("unbound").unwrap();
    assert!(!store.is_dirty("unbound"));
    store.clear_dirty("unbound").unwrap();
}

#[test]
fn test_record_collections_persist_positionally() {
    let dir = temp_config_dir();
    let options = store_options(&dir);
    let note = ChangeNote::new("Routes");
    {
        let store = ConfigStore::open(options.clone()).unwrap();
        store.set("staticroutes/route/0/network", text("10.0.0.0/24"), &note).unwrap();
        store.set("staticroutes/route/2/network", text("10.2.0.0/24"), &note).unwrap();
        assert_eq!(
            tree::record_ids(store.get_opt("staticroutes/route").as_ref()),
            Some(vec![0, 2])
        );
    }

    let reopened = ConfigStore::open(options).unwrap();
    assert_eq!(
        tree::record_ids(reopened.get_opt("staticroutes/route").as_ref()),
        Some(vec![0, 1])
    );
    assert_eq!(
        reopened.get_opt("staticroutes/route/1/network"),
        Some(text("10.2.0.0/24"))
    );
}

#[test]
fn test_options_from_toml() {
    let options = StoreOptions::from_toml_str(
        r#"
            path = "/var/lib/firewall/config.toml"
            lock_interval_ms = 250
        "#,
    )
    .unwrap();

    assert_eq!(options.path.to_str(), Some("/var/lib/firewall/config.toml"));
    assert_eq!(options.lock_attempts, 60);
    assert_eq!(options.lock_interval_ms, 250);
    assert_eq!(options.audit_limit, 256);
    assert_eq!(options.dirty_dir, None);

    let dir = temp_config_dir();
    let file = dir.path().join("store.toml");
    fs::write(&file, "path = \"config.toml\"\nlock_attempts = 5\n").unwrap();
    let loaded = StoreOptions::load(&file).unwrap();
    assert_eq!(loaded.lock_attempts, 5);

    assert!(StoreOptions::from_toml_str("lock_attempts = \"many\"").is_err());
}
