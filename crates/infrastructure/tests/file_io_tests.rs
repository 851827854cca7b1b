use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hotconf_core::{
    ChangeKind, ConfigDiscovery, ConfigLoader, ConfigManagerBuilder, ConfigManagerOptions,
    ConfigSaver, ConfigWatchSource, ErrorKind, FileEventKind, LoadErrorKind,
};
use hotconf_infrastructure::{FileConfigLoader, FileConfigSaver, FileDiscovery, NotifyConfigWatcher};
use serde_json::json;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn load_kind(err: &hotconf_core::ConfigError) -> Option<LoadErrorKind> {
    match err.root() {
        hotconf_core::ConfigError::Load { kind, .. } => Some(*kind),
        _ => None,
    }
}

#[tokio::test]
async fn test_loader_reads_each_format() {
    let dir = TempDir::new().unwrap();
    let loader = FileConfigLoader::default();

    let json_path = write(&dir, "a.json", r#"{"port": 1}"#);
    let yaml_path = write(&dir, "b.yml", "port: 2\n");
    let toml_path = write(&dir, "c.toml", "port = 3\n");

    assert_eq!(loader.load(&json_path).await.unwrap(), json!({"port": 1}));
    assert_eq!(loader.load(&yaml_path).await.unwrap(), json!({"port": 2}));
    assert_eq!(loader.load(&toml_path).await.unwrap(), json!({"port": 3}));
}

#[tokio::test]
async fn test_loader_error_kinds() {
    let dir = TempDir::new().unwrap();
    let loader = FileConfigLoader::default();

    let empty = write(&dir, "empty.yaml", "  \n\t\n");
    assert_eq!(loader.load(&empty).await.unwrap(), json!({}));

    let broken = write(&dir, "broken.json", "{\"port\": ");
    let err = loader.load(&broken).await.unwrap_err();
    assert_eq!(load_kind(&err), Some(LoadErrorKind::Parse));
    assert!(err.is_parse_error());

    let scalar = write(&dir, "scalar.json", "42");
    let err = loader.load(&scalar).await.unwrap_err();
    assert_eq!(load_kind(&err), Some(LoadErrorKind::Parse));

    let ini = write(&dir, "legacy.ini", "port=1");
    let err = loader.load(&ini).await.unwrap_err();
    assert_eq!(load_kind(&err), Some(LoadErrorKind::UnsupportedFormat));

    let err = loader.load(&dir.path().join("missing.json")).await.unwrap_err();
    assert_eq!(load_kind(&err), Some(LoadErrorKind::NotFound));
    assert!(!err.is_parse_error());
}

#[tokio::test]
async fn test_discovery_orders_base_before_environment() {
    let dir = TempDir::new().unwrap();
    write(&dir, "config.yaml", "a: 1\n");
    write(&dir, "config.json", "{}");
    write(&dir, "config.production.toml", "a = 2\n");
    write(&dir, "config.staging.json", "{}");

    let discovery = FileDiscovery::default();
    let files = discovery
        .discover(dir.path(), "config", Some("production"))
        .await
        .unwrap();

    assert_eq!(files.len(), 2);
    // json 在注册表中排在 yaml 前面
    assert_eq!(files[0].path, dir.path().join("config.json"));
    assert_eq!(files[0].format, "json");
    assert!(!files[0].is_environment_specific);
    assert_eq!(files[1].path, dir.path().join("config.production.toml"));
    assert_eq!(files[1].environment.as_deref(), Some("production"));

    let base_only = discovery.discover(dir.path(), "config", None).await.unwrap();
    assert_eq!(base_only.len(), 1);

    let err = discovery
        .discover(&dir.path().join("nope"), "config", None)
        .await
        .unwrap_err();
    assert_eq!(load_kind(&err), Some(LoadErrorKind::NotFound));
}

#[tokio::test]
async fn test_saver_output_loads_back() {
    let dir = TempDir::new().unwrap();
    let saver = FileConfigSaver::default();
    let loader = FileConfigLoader::default();
    let config = json!({"server": {"port": 8080, "hosts": ["a", "b"]}, "debug": false});

    for name in ["nested/out.json", "nested/out.yaml", "nested/out.toml"] {
        let path = dir.path().join(name);
        let format = path.extension().unwrap().to_str().unwrap().to_string();
        saver.save(&path, &config, &format).await.unwrap();
        assert_eq!(loader.load(&path).await.unwrap(), config, "{name}");
    }

    let err = saver
        .save(&dir.path().join("out.ini"), &config, "ini")
        .await
        .unwrap_err();
    assert_eq!(load_kind(&err), Some(LoadErrorKind::UnsupportedFormat));
}

#[tokio::test]
async fn test_manager_merges_environment_files_from_disk() {
    let dir = TempDir::new().unwrap();
    write(&dir, "config.json", r#"{"server": {"port": 3000, "host": "${APP_HOST:localhost}"}}"#);

    let manager = ConfigManagerBuilder::new(ConfigManagerOptions {
        config_dir: dir.path().to_path_buf(),
        environment: Some("production".to_string()),
        ..Default::default()
    })
    .loader(Arc::new(FileConfigLoader::default()))
    .discovery(Arc::new(FileDiscovery::default()))
    .saver(Arc::new(FileConfigSaver::default()))
    .env_provider(Arc::new(std::collections::HashMap::<String, String>::new()))
    .build()
    .unwrap();

    manager.load().await.unwrap();
    assert_eq!(
        manager.config().await,
        json!({"server": {"port": 3000, "host": "localhost"}})
    );

    write(&dir, "config.production.yaml", "server:\n  port: 8080\n");
    let outcome = manager.reload().await.unwrap();
    let changes = outcome.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Modified);
    assert_eq!(changes[0].path, "server.port");
    assert_eq!(changes[0].old_value, Some(json!(3000)));
    assert_eq!(changes[0].new_value, Some(json!(8080)));

    let out = dir.path().join("export/merged.toml");
    manager.save(&out, "toml").await.unwrap();
    assert!(fs::read_to_string(&out).unwrap().contains("port = 8080"));

    write(&dir, "config.production.yaml", "server: [unterminated\n");
    let err = manager.reload().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert_eq!(manager.get("server.port").await, Some(json!(8080)));
}

#[tokio::test]
async fn test_notify_watcher_reports_changes() {
    let dir = TempDir::new().unwrap();
    let watched = write(&dir, "config.json", "{}");
    write(&dir, "unrelated.json", "{}");

    let watcher = NotifyConfigWatcher::default();
    let mut subscription = watcher.watch(std::slice::from_ref(&watched)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::write(dir.path().join("unrelated.json"), r#"{"x": 1}"#).unwrap();
    fs::write(&watched, r#"{"a": 1}"#).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("no file event within timeout")
        .expect("watch channel closed");
    assert_eq!(event.path, watched);
    assert!(matches!(event.kind, FileEventKind::Changed | FileEventKind::Added));
}
