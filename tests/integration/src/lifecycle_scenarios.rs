//! End-to-end install, remove and gating scenarios
//!
//! Each test builds a catalog on disk, drives the public [`Engine`] API and
//! checks the workspace, manifest and audit log afterwards. Install scripts
//! are counting stubs, so "nothing was executed" is observable.

#![cfg(unix)]

use envkit_catalog::TemplateMode;
use envkit_extensions::{
    AuditOutcome, Engine, Error, ExecutionError, GateError, HookStatus, InstallOptions,
    ResolutionError, ResolveRequest,
};
use envkit_test_utils::{ExtensionBuilder, TestWorkspace};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn workspace() -> TestWorkspace {
    let ws = TestWorkspace::new();
    ws.write_config("shell = \"sh\"\n");
    ws
}

/// Register `builder` with a counting `install.sh`.
fn add(ws: &TestWorkspace, builder: ExtensionBuilder) {
    let def = builder.build();
    ws.add_extension(&def);
    ws.add_counting_script(&def.id, "install.sh");
}

fn engine(ws: &TestWorkspace) -> Engine {
    Engine::new(ws.catalog(), ws.workspace()).unwrap()
}

#[test]
fn conflicting_install_never_runs_its_script() {
    let ws = workspace();
    add(&ws, ExtensionBuilder::new("docker").owns("docker-sock"));
    add(&ws, ExtensionBuilder::new("podman").conflicts_with("docker").owns("docker-sock"));
    let engine = engine(&ws);

    engine.install("docker", "alice").unwrap();
    let err = engine.install("podman", "alice").unwrap_err();

    assert_eq!(
        err.to_string(),
        "'podman' conflicts with active extension 'docker'; remove 'docker' before installing 'podman'"
    );
    assert!(matches!(err, Error::Gate(GateError::ExtensionConflict { .. })));
    assert_eq!(ws.invocation_count("podman", "install.sh"), 0);
    assert!(engine.manifest().unwrap().get("podman").is_none());
}

#[test]
fn merge_claims_coexist_and_survive_partner_removal() {
    let ws = workspace();
    for (id, key) in [("claude-code", "code"), ("claude-flow", "flow")] {
        let def = ExtensionBuilder::new(id)
            .merges("claude-dir")
            .template("settings.json", ".claude/settings.json", TemplateMode::Overwrite)
            .build();
        ws.add_extension(&def);
        ws.add_extension_file(
            id,
            "settings.json",
            &format!(r#"{{"mcpServers": {{"{key}": {{"command": "${{EXTENSION_ID}}"}}}}}}"#),
        );
    }
    let engine = engine(&ws);

    engine.install("claude-code", "alice").unwrap();
    let second = engine.install("claude-flow", "alice").unwrap();
    assert_eq!(second.installed[0].merged.len(), 1);

    let settings: serde_json::Value =
        serde_json::from_str(&ws.read_workspace_file(".claude/settings.json")).unwrap();
    assert_eq!(settings["mcpServers"]["code"]["command"], "claude-code");
    assert_eq!(settings["mcpServers"]["flow"]["command"], "claude-flow");

    engine.remove("claude-code", "alice", false).unwrap();
    let manifest = engine.manifest().unwrap();
    let owners: Vec<&str> = manifest
        .claims()
        .iter()
        .map(|c| c.extension_id.as_str())
        .collect();
    assert_eq!(owners, vec!["claude-flow"]);
}

#[test]
fn undeclared_overlap_needs_explicit_override() {
    let ws = workspace();
    add(&ws, ExtensionBuilder::new("vscode").owns("editor-config"));
    add(&ws, ExtensionBuilder::new("cursor").merges("editor-config"));
    let engine = engine(&ws);

    engine.install("vscode", "alice").unwrap();
    let err = engine.install("cursor", "alice").unwrap_err();
    assert!(matches!(
        err,
        Error::Gate(GateError::UnknownOwnershipConflict { ref owner, .. }) if owner == "vscode"
    ));
    assert_eq!(ws.invocation_count("cursor", "install.sh"), 0);

    engine
        .install_with(
            "cursor",
            "alice",
            InstallOptions {
                allow_unknown_ownership: true,
            },
        )
        .unwrap();
    assert_eq!(ws.invocation_count("cursor", "install.sh"), 1);
}

#[test]
fn removal_with_active_dependents_needs_cascade() {
    let ws = workspace();
    add(&ws, ExtensionBuilder::new("nodejs"));
    add(&ws, ExtensionBuilder::new("claude-code").depends_on("nodejs"));
    add(&ws, ExtensionBuilder::new("claude-flow").depends_on("claude-code"));
    let engine = engine(&ws);
    engine.install("claude-flow", "alice").unwrap();

    let err = engine.remove("nodejs", "alice", false).unwrap_err();
    match err {
        Error::Resolution(ResolutionError::DependentsStillActive {
            extension,
            dependents,
        }) => {
            assert_eq!(extension, "nodejs");
            assert_eq!(dependents, vec!["claude-code", "claude-flow"]);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(engine.manifest().unwrap().active_ids().len(), 3);

    let removed = engine.remove("nodejs", "alice", true).unwrap();
    assert_eq!(removed.removed, vec!["claude-flow", "claude-code", "nodejs"]);
    assert!(engine.manifest().unwrap().active_ids().is_empty());
}

#[test]
fn eleventh_individual_call_is_rate_limited() {
    let ws = workspace();
    add(&ws, ExtensionBuilder::new("tool"));
    let engine = engine(&ws);

    for _ in 0..10 {
        engine.install("tool", "mallory").unwrap();
    }
    let err = engine.install("tool", "mallory").unwrap_err();
    assert!(matches!(err, Error::Gate(GateError::RateLimited { .. })));
    assert_eq!(ws.invocation_count("tool", "install.sh"), 10);

    let last = engine.audit_records().unwrap().pop().unwrap();
    assert_eq!(last.result, AuditOutcome::Failure);
    assert_eq!(last.stage.as_deref(), Some("rate-limit"));
}

#[rstest]
#[case::target_missing(false)]
#[case::target_present(true)]
fn traversal_script_path_is_rejected(#[case] create_target: bool) {
    let ws = workspace();
    ws.add_extension(&ExtensionBuilder::new("evil").script("../../etc/passwd").build());
    if create_target {
        let target = ws.extension_dir("evil").join("../../etc/passwd");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, "echo owned > \"$ENVKIT_WORKSPACE/owned\"\n").unwrap();
    }
    let engine = engine(&ws);

    let err = engine.install("evil", "alice").unwrap_err();
    assert!(
        matches!(err, Error::Execution(ExecutionError::PathTraversalRejected { ref path, .. }) if path == "../../etc/passwd"),
        "got: {err:?}"
    );
    assert!(!ws.workspace_file_exists("owned"));
    assert!(engine.list_manifest().unwrap().is_empty());
    assert_eq!(
        engine.audit_records().unwrap()[0].stage.as_deref(),
        Some("sandbox")
    );
}

#[test]
fn reinstall_updates_entry_in_place() {
    let ws = workspace();
    add(&ws, ExtensionBuilder::new("python").version("3.12.0"));
    let engine = engine(&ws);

    engine.install("python", "alice").unwrap();
    let first = engine.list_manifest().unwrap().remove(0);
    engine.install("python", "alice").unwrap();
    let entries = engine.list_manifest().unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].install_count, 2);
    assert_eq!(entries[0].installed_at, first.installed_at);
    assert!(entries[0].updated_at >= first.updated_at);
    assert_eq!(ws.invocation_count("python", "install.sh"), 2);
}

#[test]
fn dependency_cycle_is_a_hard_failure() {
    let ws = workspace();
    add(&ws, ExtensionBuilder::new("a").depends_on("b"));
    add(&ws, ExtensionBuilder::new("b").depends_on("c"));
    add(&ws, ExtensionBuilder::new("c").depends_on("a"));
    add(&ws, ExtensionBuilder::new("d").depends_on("a"));
    let engine = engine(&ws);

    let err = engine.resolve(&ResolveRequest::extension("d")).unwrap_err();
    match err {
        Error::Resolution(ResolutionError::CycleDetected { members }) => {
            assert_eq!(members, vec!["a", "b", "c"]);
        }
        other => panic!("unexpected: {other:?}"),
    }

    assert!(engine.install("a", "alice").is_err());
    for id in ["a", "b", "c"] {
        assert_eq!(ws.invocation_count(id, "install.sh"), 0);
    }
    assert!(engine.list_manifest().unwrap().is_empty());
}

#[test]
fn init_hooks_run_in_cached_priority_order_once() {
    let ws = workspace();
    add(&ws, ExtensionBuilder::new("git").init_hook(5, "sh -c 'echo git >> hooks.log'", ".git-hook"));
    add(&ws, ExtensionBuilder::new("claude-code").init_hook(20, "sh -c 'echo claude >> hooks.log'", ".claude/.initialized"));
    add(&ws, ExtensionBuilder::new("broken").init_hook(10, "sh -c 'exit 3'", ".broken"));
    let engine = engine(&ws);
    for id in ["claude-code", "git", "broken"] {
        engine.install(id, "alice").unwrap();
    }

    let project = ws.workspace();
    let report = engine.run_project_init_hooks(&project).unwrap();
    assert_eq!(report.order(), vec!["git", "broken", "claude-code"]);
    assert_eq!(report.failures().len(), 1);
    assert_eq!(ws.read_workspace_file("hooks.log"), "git\nclaude\n");
    assert!(ws.workspace_file_exists(".claude/.initialized"));

    let rerun = engine.run_project_init_hooks(&project).unwrap();
    assert_eq!(rerun.results[0].status, HookStatus::SkippedMarkerPresent);
    assert!(matches!(rerun.results[1].status, HookStatus::Failed { .. }));
    assert_eq!(ws.read_workspace_file("hooks.log"), "git\nclaude\n");
}

#[test]
fn validation_is_a_separate_phase() {
    let ws = workspace();
    add(
        &ws,
        ExtensionBuilder::new("shell-tools").validation("sh", "-c", Some("^$")),
    );
    add(
        &ws,
        ExtensionBuilder::new("wrong-version").validation("envkit-missing-binary", "--version", None),
    );
    let engine = engine(&ws);
    engine.install("shell-tools", "alice").unwrap();
    engine.install("wrong-version", "alice").unwrap();
    let before = engine.list_manifest().unwrap();

    // `sh -c` with no script fails, so validation reports it.
    assert!(matches!(
        engine.validate("shell-tools").unwrap_err(),
        Error::Execution(ExecutionError::ValidationFailed { .. })
    ));
    assert!(matches!(
        engine.validate("wrong-version").unwrap_err(),
        Error::Execution(ExecutionError::ValidationFailed { .. })
    ));
    assert_eq!(engine.list_manifest().unwrap(), before);
}
