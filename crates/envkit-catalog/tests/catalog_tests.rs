//! Tests for loading catalogs from their on-disk layout

use std::fs;
use std::path::Path;

use envkit_catalog::{Catalog, Error, ExtensionCategory, InstallMethod, PackageManager};
use pretty_assertions::assert_eq;
use rstest::rstest;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

const NODEJS_TOML: &str = r#"
id = "nodejs"
version = "20.11.0"
category = "languages"

[install.method]
type = "package-manager"
manager = "mise"
packages = ["node@20"]

[resources]
disk_mb = 1000
memory_mb = 128
install_time_sec = 30
"#;

const CLAUDE_YAML: &str = r#"
id: claude-code
version: 1.0.0
category: claude
dependencies: [nodejs]
shared_resources:
  - tag: claude-dir
    access: merge
install:
  method:
    type: script
    path: install.sh
"#;

const PROFILES: &str = r#"
[profiles.minimal]
description = "Node plus Claude"
extensions = ["nodejs", "claude-code"]
"#;

#[test]
fn test_load_mixed_formats() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "extensions/nodejs/extension.toml", NODEJS_TOML);
    write(dir.path(), "extensions/claude-code/extension.yaml", CLAUDE_YAML);
    write(dir.path(), "profiles.toml", PROFILES);

    let catalog = Catalog::load(dir.path()).unwrap();

    assert_eq!(catalog.ids(), vec!["claude-code", "nodejs"]);
    let node = catalog.get("nodejs").unwrap();
    assert_eq!(node.resources.disk_mb, 1000);
    match &node.install.method {
        InstallMethod::PackageManager(step) => assert_eq!(step.manager, PackageManager::Mise),
        other => panic!("unexpected method: {other:?}"),
    }
    assert_eq!(catalog.by_category(ExtensionCategory::Claude).len(), 1);
    assert_eq!(
        catalog.profile("minimal").unwrap().extensions,
        vec!["nodejs", "claude-code"]
    );
    assert!(catalog.verify_references().is_empty());
}

#[test]
fn test_missing_root() {
    let dir = TempDir::new().unwrap();
    let err = Catalog::load(&dir.path().join("nope")).unwrap_err();
    assert!(matches!(err, Error::CatalogNotFound(_)));
}

#[test]
fn test_directory_without_definition() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "extensions/empty/README.md", "nothing here");
    let err = Catalog::load(dir.path()).unwrap_err();
    assert!(matches!(err, Error::DefinitionNotFound(_)), "got: {err:?}");
}

#[test]
fn test_directory_name_must_match_id() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "extensions/node/extension.toml", NODEJS_TOML);
    let err = Catalog::load(dir.path()).unwrap_err();
    assert!(
        matches!(err, Error::IdMismatch { ref dir, ref id } if dir == "node" && id == "nodejs"),
        "got: {err:?}"
    );
}

#[rstest]
#[case::wildcard("1.x")]
#[case::empty("")]
#[case::tag("latest")]
fn test_invalid_version_fails_load(#[case] version: &str) {
    let dir = TempDir::new().unwrap();
    let body = NODEJS_TOML.replace("20.11.0", version);
    write(dir.path(), "extensions/nodejs/extension.toml", &body);
    let err = Catalog::load(dir.path()).unwrap_err();
    assert!(matches!(err, Error::InvalidVersion { .. }), "got: {err:?}");
}

#[test]
fn test_malformed_definition_is_parse_error() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "extensions/broken/extension.json",
        r#"{"id": "broken", "version": "1.0.0"}"#,
    );
    let err = Catalog::load(dir.path()).unwrap_err();
    assert!(
        matches!(err, Error::Fs(envkit_fs::Error::ConfigParse { .. })),
        "got: {err:?}"
    );
}

#[test]
fn test_profile_with_unknown_member() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "extensions/nodejs/extension.toml", NODEJS_TOML);
    write(dir.path(), "profiles.toml", PROFILES);
    let err = Catalog::load(dir.path()).unwrap_err();
    assert!(matches!(err, Error::UnknownProfileMember { .. }), "got: {err:?}");
}
