//! Engine behavior against real scripts in a temporary catalog.

#![cfg(unix)]

use envkit_catalog::{HybridStep, PackageManager, PackageStep, ScriptStep, TemplateMode, TemplateStep};
use envkit_extensions::{
    AuditAction, AuditOutcome, Engine, Error, ExecutionError, GateError, OperationClass,
    StaticSecretsProvider,
};
use envkit_test_utils::{ExtensionBuilder, TestWorkspace};
use pretty_assertions::assert_eq;

fn workspace() -> TestWorkspace {
    let ws = TestWorkspace::new();
    ws.write_config("shell = \"sh\"\n");
    ws
}

fn scripted(ws: &TestWorkspace, builder: ExtensionBuilder) -> String {
    let def = builder.build();
    ws.add_extension(&def);
    ws.add_counting_script(&def.id, "install.sh");
    def.id
}

fn engine(ws: &TestWorkspace) -> Engine {
    Engine::new(ws.catalog(), ws.workspace()).unwrap()
}

#[test]
fn failed_script_leaves_no_manifest_entry() {
    let ws = workspace();
    ws.add_extension(&ExtensionBuilder::new("flaky").build());
    ws.add_extension_file("flaky", "install.sh", "echo half-done > partial.txt\necho 'E: no network' >&2\nexit 100\n");
    let engine = engine(&ws);

    let err = engine.install("flaky", "ci").unwrap_err();
    match &err {
        Error::Execution(ExecutionError::InstallFailed {
            extension,
            exit_code,
            stderr_tail,
            ..
        }) => {
            assert_eq!(extension, "flaky");
            assert_eq!(*exit_code, Some(100));
            assert_eq!(stderr_tail, "E: no network");
        }
        other => panic!("unexpected: {other:?}"),
    }

    assert!(engine.list_manifest().unwrap().is_empty());
    // Files written before the failure are left for the next attempt.
    assert!(ws.extension_dir("flaky").join("partial.txt").exists());

    let records = engine.audit_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].result, AuditOutcome::Failure);
    assert_eq!(records[0].stage.as_deref(), Some("execute"));
}

#[test]
fn secrets_reach_script_only_through_environment() {
    let ws = workspace();
    ws.add_extension(
        &ExtensionBuilder::new("claude-code")
            .secret("ENVKIT_TEST_API_KEY", true)
            .build(),
    );
    ws.add_extension_file(
        "claude-code",
        "install.sh",
        "printf %s \"$ENVKIT_TEST_API_KEY\" > \"$ENVKIT_WORKSPACE/key.txt\"\n",
    );

    let missing = engine(&ws);
    let err = missing.install("claude-code", "alice").unwrap_err();
    assert!(matches!(
        err,
        Error::Execution(ExecutionError::SecretUnavailable { ref secret, .. }) if secret == "ENVKIT_TEST_API_KEY"
    ));
    assert!(!ws.workspace_file_exists("key.txt"));

    let provided = engine(&ws).with_secrets(StaticSecretsProvider::new().with("ENVKIT_TEST_API_KEY", "sk-test"));
    provided.install("claude-code", "alice").unwrap();
    assert_eq!(ws.read_workspace_file("key.txt"), "sk-test");

    let audit = std::fs::read_to_string(ws.workspace().join(".envkit/audit.jsonl")).unwrap();
    assert!(!audit.contains("sk-test"));
}

#[test]
fn rate_limit_follows_workspace_config() {
    let ws = TestWorkspace::new();
    ws.write_config("shell = \"sh\"\n\n[rate_limit]\nmax_operations = 2\nwindow_secs = 3600\n");
    scripted(&ws, ExtensionBuilder::new("tool"));
    let engine = engine(&ws);

    engine.install("tool", "bob").unwrap();
    engine.install("tool", "bob").unwrap();
    let err = engine.install("tool", "bob").unwrap_err();
    match err {
        Error::Gate(GateError::RateLimited {
            actor,
            operation,
            retry_after,
        }) => {
            assert_eq!(actor, "bob");
            assert_eq!(operation, OperationClass::Install);
            assert!(retry_after.as_secs() > 3500);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(ws.invocation_count("tool", "install.sh"), 2);

    // Another actor has its own budget.
    engine.install("tool", "carol").unwrap();
}

#[test]
fn removal_script_runs_and_claims_are_released() {
    let ws = workspace();
    let def = ExtensionBuilder::new("docker")
        .owns("docker-sock")
        .remove_script("uninstall.sh")
        .build();
    ws.add_extension(&def);
    ws.add_counting_script("docker", "install.sh");
    ws.add_counting_script("docker", "uninstall.sh");
    let engine = engine(&ws);

    engine.install("docker", "alice").unwrap();
    assert_eq!(engine.manifest().unwrap().claims_of("docker").len(), 1);

    let result = engine.remove("docker", "alice", false).unwrap();
    assert_eq!(result.removed, vec!["docker"]);
    assert_eq!(ws.invocation_count("docker", "uninstall.sh"), 1);
    assert!(engine.manifest().unwrap().claims().is_empty());

    let actions: Vec<AuditAction> = engine.audit_records().unwrap().iter().map(|r| r.action).collect();
    assert_eq!(actions, vec![AuditAction::Install, AuditAction::Remove]);
}

#[test]
fn hybrid_runs_packages_then_script_then_templates() {
    let ws = workspace();
    let mut def = ExtensionBuilder::new("stack").build();
    def.install.method = envkit_catalog::InstallMethod::Hybrid(HybridStep {
        packages: Some(PackageStep {
            manager: PackageManager::Npm,
            packages: vec!["bad;pkg".to_string()],
        }),
        script: Some(ScriptStep {
            path: "install.sh".to_string(),
            shell: None,
            args: Vec::new(),
        }),
        templates: vec![TemplateStep {
            source: "rc".to_string(),
            destination: ".stackrc".to_string(),
            mode: TemplateMode::Overwrite,
            resource: None,
        }],
    });
    ws.add_extension(&def);
    ws.add_counting_script("stack", "install.sh");
    ws.add_extension_file("stack", "rc", "ws=${WORKSPACE}\n");
    let engine = engine(&ws);

    // Package validation fails before the script step is reached.
    let err = engine.install("stack", "alice").unwrap_err();
    assert!(matches!(err, Error::Execution(ExecutionError::InvalidPackageSpec { .. })));
    assert_eq!(ws.invocation_count("stack", "install.sh"), 0);
    assert!(!ws.workspace_file_exists(".stackrc"));
}

#[test]
fn script_args_and_declared_shell_are_used() {
    let ws = workspace();
    let mut def = ExtensionBuilder::new("args").build();
    def.install.method = envkit_catalog::InstallMethod::Script(ScriptStep {
        path: "scripts/install.sh".to_string(),
        shell: Some("sh".to_string()),
        args: vec!["--mode".to_string(), "fast".to_string()],
    });
    ws.add_extension(&def);
    ws.add_extension_file(
        "args",
        "scripts/install.sh",
        "printf '%s ' \"$@\" > \"$ENVKIT_WORKSPACE/args.txt\"\n",
    );

    engine(&ws).install("args", "alice").unwrap();
    assert_eq!(ws.read_workspace_file("args.txt"), "--mode fast ");
}

#[cfg(target_os = "linux")]
#[test]
fn symlinked_script_escaping_extension_dir_is_rejected() {
    let ws = workspace();
    ws.add_extension(&ExtensionBuilder::new("linker").script("link/install.sh").build());
    let outside = ws.root().join("outside");
    std::fs::create_dir_all(&outside).unwrap();
    std::fs::write(outside.join("install.sh"), "touch \"$ENVKIT_WORKSPACE/pwned\"\n").unwrap();
    std::os::unix::fs::symlink(&outside, ws.extension_dir("linker").join("link")).unwrap();

    let err = engine(&ws).install("linker", "alice").unwrap_err();
    assert!(matches!(err, Error::Execution(ExecutionError::PathTraversalRejected { .. })));
    assert!(!ws.workspace_file_exists("pwned"));
}
