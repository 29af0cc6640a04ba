use super::*;

use std::collections::HashMap;

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(
        normalize_database_url("sqlite:data/test.db"),
        "sqlite://data/test.db"
    );
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
}

#[test]
fn creates_parent_dir_for_sqlite_url() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.path().join("data").exists());
}

#[test]
fn environment_overrides_file_settings() {
    let mut settings = Settings::default();
    let file_cfg = HashMap::from([
        ("bind_addr".to_string(), "0.0.0.0:9000".to_string()),
        ("store".to_string(), "sqlite".to_string()),
        ("max_photo_bytes".to_string(), "1024".to_string()),
    ]);
    settings.apply_file(&file_cfg);
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.store, StoreBackend::Sqlite);
    assert_eq!(settings.max_photo_bytes, 1024);

    let env = HashMap::from([
        ("APP__BIND_ADDR", "127.0.0.1:9100"),
        ("APP__STORE", "memory"),
        ("APP__SEED_DEMO_DATA", "false"),
        ("APP__MAX_PHOTO_BYTES", "not-a-number"),
    ]);
    settings.apply_env(|key| env.get(key).map(|v| v.to_string()));
    assert_eq!(settings.server_bind, "127.0.0.1:9100");
    assert_eq!(settings.store, StoreBackend::Memory);
    assert!(!settings.seed_demo_data);
    assert_eq!(settings.max_photo_bytes, 1024);
}

#[test]
fn public_url_defaults_to_bind_address_with_trailing_slash() {
    let settings = Settings::default();
    assert_eq!(
        settings.public_url().expect("url").as_str(),
        "http://127.0.0.1:8080/"
    );

    let settings = Settings {
        server_public_url: Some("https://obra.example.com/punch".into()),
        ..Settings::default()
    };
    let url = settings.public_url().expect("url");
    assert_eq!(
        url.join("photos/3").expect("join").as_str(),
        "https://obra.example.com/punch/photos/3"
    );

    let settings = Settings {
        server_public_url: Some("not a url".into()),
        ..Settings::default()
    };
    assert!(settings.public_url().is_err());
}
