//! Configuration file tests
//!
//! Tests touching KRITIKOS_CONFIG are #[serial] to avoid env races.

use kritikos_common::config::{
    load_or_default, load_toml_config, resolve_config_path, resolve_database_path,
    write_toml_config, LlmConfig, TomlConfig, CONFIG_ENV_VAR,
};
use serial_test::serial;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_partial_file_leaves_other_fields_unset() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
port = 5800

[llm]
model = "gemini-2.5-pro"
max_retries = 6

[pipeline]
lot_size = 25
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.port, Some(5800));
    assert_eq!(config.llm.model.as_deref(), Some("gemini-2.5-pro"));
    assert_eq!(config.llm.max_retries, Some(6));
    assert!(config.llm.api_key.is_none());
    assert_eq!(config.pipeline.lot_size, Some(25));
    assert!(config.pipeline.item_delay_ms.is_none());
    assert!(config.fetcher.storage_base_url.is_none());
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(matches!(err, kritikos_common::Error::Config(_)));
}

#[test]
fn test_missing_file_yields_defaults() {
    let config = load_or_default(Some(Path::new("/nonexistent/kritikos/config.toml"))).unwrap();
    assert_eq!(config, TomlConfig::default());
    assert_eq!(load_or_default(None).unwrap(), TomlConfig::default());
}

#[test]
fn test_write_then_load_preserves_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sub").join("config.toml");

    let config = TomlConfig {
        port: Some(5999),
        llm: LlmConfig {
            api_key: Some("secret".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    write_toml_config(&config, &path).unwrap();

    assert_eq!(load_toml_config(&path).unwrap(), config);
    assert!(!path.with_extension("toml.tmp").exists());
}

#[test]
#[serial]
fn test_cli_path_beats_environment() {
    std::env::set_var(CONFIG_ENV_VAR, "/from/env.toml");
    let resolved = resolve_config_path(Some(Path::new("/from/cli.toml")));
    std::env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));
}

#[test]
#[serial]
fn test_environment_path_used_without_cli() {
    std::env::set_var(CONFIG_ENV_VAR, "/from/env.toml");
    let resolved = resolve_config_path(None);
    std::env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));
}

#[test]
fn test_database_path_priority() {
    let toml_config = TomlConfig {
        database_path: Some(PathBuf::from("/toml/kritikos.db")),
        ..Default::default()
    };

    assert_eq!(
        resolve_database_path(Some(Path::new("/cli/kritikos.db")), &toml_config),
        PathBuf::from("/cli/kritikos.db")
    );
    assert_eq!(
        resolve_database_path(None, &toml_config),
        PathBuf::from("/toml/kritikos.db")
    );
    assert!(resolve_database_path(None, &TomlConfig::default()).ends_with("kritikos.db"));
}
