//! Profile installs and infrastructure sizing.

use envkit_catalog::{InstallMethod, TemplateMode, TemplateStep};
use envkit_extensions::{
    Engine, Error, MemberStatus, OperationClass, RateLimiter, ResolveRequest, ResourceTier,
};
use envkit_test_utils::{ExtensionBuilder, TestWorkspace};
use pretty_assertions::assert_eq;
use rstest::rstest;

/// Register an extension whose install renders `out/<id>` into the
/// workspace, so profiles can be exercised without a shell.
fn add(ws: &TestWorkspace, builder: ExtensionBuilder) {
    let mut def = builder.build();
    def.install.method = InstallMethod::Template(TemplateStep {
        source: "stamp".into(),
        destination: format!("out/{}", def.id),
        mode: TemplateMode::Overwrite,
        resource: None,
    });
    ws.add_extension(&def);
    ws.add_extension_file(&def.id, "stamp", "${EXTENSION_ID}@${EXTENSION_VERSION}\n");
}

fn engine(ws: &TestWorkspace) -> Engine {
    Engine::new(ws.catalog(), ws.workspace()).unwrap()
}

#[test]
fn minimal_profile_installs_in_order_and_sizes_small() {
    let ws = TestWorkspace::new();
    add(&ws, ExtensionBuilder::new("a").resources(1000, 128, 30));
    add(&ws, ExtensionBuilder::new("b").depends_on("a").resources(2200, 256, 90));
    ws.add_profile("minimal", &["b", "a"]);
    let engine = engine(&ws);

    let plan = engine.resolve(&ResolveRequest::profile("minimal")).unwrap();
    assert_eq!(plan.ids(), vec!["a", "b"]);

    let result = engine.install_profile("minimal", "alice").unwrap();
    assert_eq!(result.plan(), vec!["a", "b"]);
    assert!(result.is_complete());

    let entries = engine.list_manifest().unwrap();
    assert_eq!(entries.iter().filter(|e| e.active).count(), 2);
    assert_eq!(ws.read_workspace_file("out/b"), "b@1.0.0\n");

    let sizing = engine.compute_resource_tier(&plan, "docker").unwrap();
    assert_eq!(sizing.totals.disk_mb, 3200);
    assert_eq!(sizing.totals.memory_mb, 384);
    assert_eq!(sizing.totals.install_time_sec, 120);
    assert_eq!(sizing.tier, ResourceTier::Small);
    assert_eq!(
        engine.compute_resource_tier(&plan, "docker").unwrap(),
        sizing
    );
}

#[test]
fn eleven_member_profile_is_not_rate_limited() {
    let ws = TestWorkspace::new();
    let ids: Vec<String> = (0..11).map(|i| format!("tool-{i:02}")).collect();
    for id in &ids {
        add(&ws, ExtensionBuilder::new(id));
    }
    let members: Vec<&str> = ids.iter().map(String::as_str).collect();
    ws.add_profile("everything", &members);
    let engine = engine(&ws);

    let result = engine.install_profile("everything", "alice").unwrap();
    assert_eq!(result.installed().len(), 11);

    let bucket = RateLimiter::new(&ws.workspace(), engine.config())
        .bucket("alice", OperationClass::Install)
        .unwrap();
    assert!(bucket.is_none(), "profile installs must not consume tokens");

    let records = engine.audit_records().unwrap();
    assert_eq!(records.len(), 11);
    assert!(records.iter().all(|r| r.batch));

    // The full individual budget is still available.
    engine.install("tool-00", "alice").unwrap();
}

#[test]
fn profile_reports_already_installed_members() {
    let ws = TestWorkspace::new();
    add(&ws, ExtensionBuilder::new("nodejs"));
    add(&ws, ExtensionBuilder::new("claude-code").depends_on("nodejs"));
    ws.add_profile("claude", &["claude-code"]);
    let engine = engine(&ws);

    engine.install("nodejs", "alice").unwrap();
    let result = engine.install_profile("claude", "alice").unwrap();

    assert!(matches!(result.status("nodejs"), Some(MemberStatus::AlreadyInstalled)));
    assert!(matches!(result.status("claude-code"), Some(MemberStatus::Installed(_))));
    assert_eq!(engine.manifest().unwrap().get("nodejs").unwrap().install_count, 1);
}

#[test]
fn unknown_profile_is_audited_once() {
    let ws = TestWorkspace::new();
    let engine = engine(&ws);

    let err = engine.install_profile("nope", "alice").unwrap_err();
    assert_eq!(err.to_string(), "unknown profile 'nope'");

    let records = engine.audit_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].resource, "profile:nope");
}

#[rstest]
#[case("docker", ResourceTier::Medium, "cpus=4,memory=8g")]
#[case("fly", ResourceTier::Medium, "performance-2x")]
#[case("northflank", ResourceTier::Medium, "nf-compute-50")]
fn sizing_maps_tier_to_provider_machine(
    #[case] provider: &str,
    #[case] tier: ResourceTier,
    #[case] machine: &str,
) {
    let ws = TestWorkspace::new();
    add(&ws, ExtensionBuilder::new("desktop").resources(12_000, 3_000, 300));
    let engine = engine(&ws);

    let plan = engine.resolve(&ResolveRequest::extension("desktop")).unwrap();
    let sizing = engine.compute_resource_tier(&plan, provider).unwrap();
    assert_eq!(sizing.tier, tier);
    assert_eq!(sizing.machine_size, machine);
}

#[test]
fn sizing_rejects_unknown_provider() {
    let ws = TestWorkspace::new();
    add(&ws, ExtensionBuilder::new("a"));
    let engine = engine(&ws);

    let plan = engine.resolve(&ResolveRequest::extension("a")).unwrap();
    assert!(matches!(
        engine.compute_resource_tier(&plan, "mainframe"),
        Err(Error::UnknownProvider { .. })
    ));
}
