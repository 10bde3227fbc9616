//! Integration tests for programmatic config updates.

use async_trait::async_trait;
use confstack::config::update::{DEFAULT_TEMPLATE, EditFn};
use confstack::config::{ConfigRewriter, CreateDecision, UpdateOptions, update_config};
use confstack::error::ConfigError;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn set_port(port: u64) -> impl FnMut(&mut Value) -> anyhow::Result<()> + Send {
    move |config: &mut Value| {
        config["port"] = json!(port);
        Ok(())
    }
}

#[tokio::test]
async fn test_creates_missing_file_from_default_template() {
    let temp = TempDir::new().unwrap();

    let result = update_config(&UpdateOptions::new(temp.path(), "app.config"), set_port(3000))
        .await
        .unwrap();

    assert!(result.created);
    assert_eq!(result.config_file, temp.path().join("app.config.ts"));
    let contents = fs::read_to_string(&result.config_file).unwrap();
    assert_eq!(contents, "export default {\n  \"port\": 3000\n}\n");
}

#[tokio::test]
async fn test_updates_existing_file_in_dot_config() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join(".config/app.mjs");
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(&file, "import x from \"x\";\nexport default defineConfig({ host: 'a' });\n").unwrap();

    let result = update_config(&UpdateOptions::new(temp.path(), "app.config"), set_port(1))
        .await
        .unwrap();

    assert!(!result.created);
    assert_eq!(result.config_file, file);
    let contents = fs::read_to_string(&file).unwrap();
    assert!(contents.starts_with("import x from \"x\";\nexport default defineConfig({"));
    assert!(contents.contains("\"host\": \"a\""));
    assert!(contents.contains("\"port\": 1"));
}

#[tokio::test]
async fn test_create_hook_can_abort_or_template() {
    let temp = TempDir::new().unwrap();

    let aborted = UpdateOptions::new(temp.path(), "app.config")
        .with_on_create(|_: &Path| CreateDecision::Abort);
    let err = update_config(&aborted, set_port(1)).await.unwrap_err();
    assert!(matches!(err, ConfigError::CreateAborted { .. }));
    assert!(!temp.path().join("app.config.ts").exists());

    let templated = UpdateOptions::new(temp.path(), "app.config")
        .with_create_extension(".js")
        .with_on_create(|_: &Path| {
            CreateDecision::Template("export default { name: 'demo' }\n".to_string())
        });
    let result = update_config(&templated, set_port(2)).await.unwrap();
    assert_eq!(result.config_file, temp.path().join("app.config.js"));
    let contents = fs::read_to_string(&result.config_file).unwrap();
    assert!(contents.contains("\"name\": \"demo\""));
}

#[tokio::test]
async fn test_data_files_are_not_updatable() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("app.config.json"), "{}").unwrap();

    let err = update_config(&UpdateOptions::new(temp.path(), "app.config"), set_port(1))
        .await
        .unwrap_err();
    match err {
        ConfigError::UnsupportedFileExtension { ext, .. } => assert_eq!(ext, ".json"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_missing_default_export() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("app.config.cjs"), "module.exports = {}\n").unwrap();

    let err = update_config(&UpdateOptions::new(temp.path(), "app.config"), set_port(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingDefaultExport { .. }));
}

#[tokio::test]
async fn test_edit_errors_surface_as_callback_errors() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("app.config.ts"), DEFAULT_TEMPLATE).unwrap();

    let err = update_config(&UpdateOptions::new(temp.path(), "app.config"), |_: &mut Value| {
        anyhow::bail!("refusing to edit")
    })
    .await
    .unwrap_err();
    assert!(matches!(err, ConfigError::Callback(_)));
    assert_eq!(
        fs::read_to_string(temp.path().join("app.config.ts")).unwrap(),
        DEFAULT_TEMPLATE
    );
}

/// Appends a marker comment after applying the edit to an empty object.
struct MarkerRewriter;

#[async_trait]
impl ConfigRewriter for MarkerRewriter {
    async fn rewrite(
        &self,
        _path: &Path,
        source: &str,
        edit: &mut EditFn<'_>,
    ) -> anyhow::Result<Option<String>> {
        let mut value = json!({});
        edit(&mut value)?;
        Ok(Some(format!("{source}// {value}\n")))
    }
}

#[tokio::test]
async fn test_custom_rewriter() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("app.config.ts"), DEFAULT_TEMPLATE).unwrap();

    let options =
        UpdateOptions::new(temp.path(), "app.config").with_rewriter(Arc::new(MarkerRewriter));
    update_config(&options, set_port(7)).await.unwrap();

    let contents = fs::read_to_string(temp.path().join("app.config.ts")).unwrap();
    assert_eq!(contents, "export default {}\n// {\"port\":7}\n");
}
