//! Translation tests
//!
//! These tests verify:
//! - read-back reports and idempotence
//! - pinning, range enforcement and replica consistency
//! - env defaulting and unit handling

use super::*;
use crate::models::{ContainerSnapshot, EnvSource, RangeBounds, WorkloadSnapshot};
use crate::reader::{extract_state, ReadOutcome};
use serde_json::json;

fn setting(name: SettingName, min: f64, max: f64, step: f64) -> Setting {
    Setting {
        name,
        bounds: RangeBounds::new(min, max, step).unwrap(),
        pinned: false,
    }
}

fn range_env(name: &str, default: Option<&str>, unit: Option<&str>) -> EnvSetting {
    EnvSetting::new(
        "web",
        name,
        "range",
        Some(1.0),
        Some(100.0),
        Some(1.0),
        None,
        unit.map(String::from),
        default.map(String::from),
        false,
        false,
    )
    .unwrap()
}

fn enum_env(name: &str, values: &[&str]) -> EnvSetting {
    EnvSetting::new(
        "web",
        name,
        "enum",
        None,
        None,
        None,
        Some(values.iter().map(|v| v.to_string()).collect()),
        None,
        None,
        false,
        false,
    )
    .unwrap()
}

fn component(name: &str, settings: Vec<Setting>, env: Vec<EnvSetting>) -> ComponentSpec {
    let (workload, container) = ComponentSpec::parse_name(name).unwrap();
    ComponentSpec {
        name: name.to_string(),
        workload,
        container,
        settings,
        env,
    }
}

fn snapshot() -> WorkloadSnapshot {
    let limits = BTreeMap::from([
        ("cpu".to_string(), "500m".to_string()),
        ("memory".to_string(), "256Mi".to_string()),
    ]);
    let app = ContainerSnapshot {
        name: "app".to_string(),
        limits: Some(limits.clone()),
        requests: Some(limits.clone()),
        env: BTreeMap::from([("GC".to_string(), EnvSource::Literal("G1GC".to_string()))]),
    };
    let sidecar = ContainerSnapshot {
        name: "sidecar".to_string(),
        limits: Some(limits),
        requests: None,
        env: BTreeMap::new(),
    };
    WorkloadSnapshot {
        name: "web".to_string(),
        labels: BTreeMap::new(),
        replicas: 2,
        containers: vec![app, sidecar],
    }
}

fn state_of(spec: &ComponentSpec, snapshot: &WorkloadSnapshot) -> ComponentState {
    match extract_state(spec, snapshot).unwrap() {
        ReadOutcome::State(state) => state,
        ReadOutcome::Excluded => panic!("unexpected exclusion"),
    }
}

fn full_component() -> ComponentSpec {
    component(
        "web/app",
        vec![
            setting(SettingName::Cpu, 0.1, 2.0, 0.1),
            setting(SettingName::Mem, 0.125, 4.0, 0.125),
            setting(SettingName::Replicas, 1.0, 5.0, 1.0),
        ],
        vec![enum_env("GC", &["G1GC", "ParallelGC"])],
    )
}

fn translate_one(
    spec: &ComponentSpec,
    snapshot: &WorkloadSnapshot,
    target: &TargetConfiguration,
    enabled: bool,
) -> Translation {
    let state = state_of(spec, snapshot);
    PatchTranslator::new(target, enabled).translate(&[(spec, &state)])
}

fn patch_for<'t>(translation: &'t Translation, workload: &str) -> &'t WorkloadPatch {
    translation
        .patches
        .get(workload)
        .expect("workload patch")
        .as_ref()
        .expect("patch should not be rejected")
}

#[test]
fn test_reports_every_declared_setting() {
    let spec = full_component();
    let translation = translate_one(&spec, &snapshot(), &TargetConfiguration::new(), false);

    let reports = &translation.components["web/app"].settings;
    assert_eq!(reports.len(), 4);
    assert_eq!(reports["cpu"].value, json!(0.5));
    assert_eq!(reports["mem"].value, json!(0.25));
    assert_eq!(reports["replicas"].value, json!(2));
    assert_eq!(reports["GC"].kind, "enum");
    assert_eq!(reports["GC"].value, json!("G1GC"));
    assert_eq!(reports["cpu"].min, Some(0.1));
}

#[test]
fn test_reapplying_read_back_values_is_a_no_op() {
    let spec = full_component();
    let snapshot = snapshot();
    let read_back = translate_one(&spec, &snapshot, &TargetConfiguration::new(), true);

    let mut target = TargetConfiguration::new();
    for (name, report) in &read_back.components["web/app"].settings {
        target.set("web/app", name, report.value.clone());
    }

    let translation = translate_one(&spec, &snapshot, &target, true);
    assert!(translation.components["web/app"].failures.is_empty());
    assert!(patch_for(&translation, "web").is_empty());
}

#[test]
fn test_resource_write_sets_quantities() {
    let spec = full_component();
    let mut target = TargetConfiguration::new();
    target.set("web/app", "cpu", json!(0.2));
    target.set("web/app", "mem", json!(0.125));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    let patch = patch_for(&translation, "web");
    let app = &patch.containers["app"];
    assert_eq!(app.resources["cpu"], "0.2");
    assert_eq!(app.resources["memory"], "128Mi");
    assert_eq!(patch.replicas, None);
}

#[test]
fn test_pinned_setting_is_reported_but_never_written() {
    let mut spec = full_component();
    spec.settings[0].pinned = true;

    let mut target = TargetConfiguration::new();
    target.set("web/app", "cpu", json!(1.5));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    let report = &translation.components["web/app"].settings["cpu"];
    assert!(report.pinned);
    assert_eq!(report.value, json!(0.5));
    assert!(patch_for(&translation, "web").is_empty());
}

#[test]
fn test_out_of_range_rejects_only_that_write() {
    let spec = full_component();
    let mut target = TargetConfiguration::new();
    target.set("web/app", "cpu", json!(2.5));
    target.set("web/app", "mem", json!(1));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    let failures = &translation.components["web/app"].failures;
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        TuningError::OutOfRange { ref setting, ref value, .. } if setting == "cpu" && value == "2.5"
    ));

    let app = &patch_for(&translation, "web").containers["app"];
    assert!(!app.resources.contains_key("cpu"));
    assert_eq!(app.resources["memory"], "1Gi");
}

#[test]
fn test_step_is_not_enforced() {
    let spec = full_component();
    let mut target = TargetConfiguration::new();
    target.set("web/app", "cpu", json!(0.33));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    assert!(translation.components["web/app"].failures.is_empty());
    assert_eq!(
        patch_for(&translation, "web").containers["app"].resources["cpu"],
        "0.33"
    );
}

#[test]
fn test_non_numeric_target_is_invalid() {
    let spec = full_component();
    let mut target = TargetConfiguration::new();
    target.set("web/app", "cpu", json!("fast"));
    target.set("web/app", "replicas", json!(2.5));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    let failures = &translation.components["web/app"].failures;
    assert_eq!(failures.len(), 2);
    assert!(failures
        .iter()
        .all(|f| matches!(f, TuningError::InvalidTargetValue { .. })));
}

#[test]
fn test_disabled_cycle_produces_reports_only() {
    let spec = full_component();
    let mut target = TargetConfiguration::new();
    target.set("web/app", "cpu", json!(1.0));
    target.set("web/app", "replicas", json!(3));

    let translation = translate_one(&spec, &snapshot(), &target, false);
    assert!(translation.patches.is_empty());
    assert_eq!(translation.components["web/app"].settings.len(), 4);
}

#[test]
fn test_replica_conflict_rejects_workload() {
    let app = full_component();
    let sidecar = component(
        "web/sidecar",
        vec![
            setting(SettingName::Cpu, 0.1, 2.0, 0.1),
            setting(SettingName::Replicas, 1.0, 5.0, 1.0),
        ],
        vec![],
    );
    let snapshot = snapshot();
    let app_state = state_of(&app, &snapshot);
    let sidecar_state = state_of(&sidecar, &snapshot);

    let mut target = TargetConfiguration::new();
    target.set("web/app", "replicas", json!(3));
    target.set("web/app", "cpu", json!(1.0));
    target.set("web/sidecar", "replicas", json!(4));

    let translation = PatchTranslator::new(&target, true)
        .translate(&[(&app, &app_state), (&sidecar, &sidecar_state)]);

    match &translation.patches["web"] {
        Err(TuningError::ReplicaConflict { workload, proposals }) => {
            assert_eq!(workload, "web");
            assert_eq!(proposals.len(), 2);
        }
        other => panic!("expected replica conflict, got {:?}", other),
    }
}

#[test]
fn test_agreeing_replica_targets_write_once() {
    let app = full_component();
    let sidecar = component(
        "web/sidecar",
        vec![setting(SettingName::Replicas, 1.0, 5.0, 1.0)],
        vec![],
    );
    let snapshot = snapshot();
    let app_state = state_of(&app, &snapshot);
    let sidecar_state = state_of(&sidecar, &snapshot);

    let mut target = TargetConfiguration::new();
    target.set("web/app", "replicas", json!(3));
    target.set("web/sidecar", "replicas", json!(3.0));

    let translation = PatchTranslator::new(&target, true)
        .translate(&[(&app, &app_state), (&sidecar, &sidecar_state)]);

    let patch = patch_for(&translation, "web");
    assert_eq!(patch.replicas, Some(3));
    assert_eq!(patch.change_count(), 1);
}

#[test]
fn test_conflicting_container_writes_reject_workload() {
    let cpu = || vec![setting(SettingName::Cpu, 0.1, 2.0, 0.1)];
    let bare = component("web", cpu(), vec![]);
    let app = component("web/app", cpu(), vec![]);
    let snapshot = snapshot();
    let bare_state = state_of(&bare, &snapshot);
    let app_state = state_of(&app, &snapshot);
    assert_eq!(bare_state.container, "app");

    let mut target = TargetConfiguration::new();
    target.set("web", "cpu", json!(1));
    target.set("web/app", "cpu", json!(1.5));

    let translation = PatchTranslator::new(&target, true)
        .translate(&[(&bare, &bare_state), (&app, &app_state)]);

    match &translation.patches["web"] {
        Err(TuningError::WriteConflict {
            workload,
            container,
            setting,
            proposals,
        }) => {
            assert_eq!(workload, "web");
            assert_eq!(container, "app");
            assert_eq!(setting, "cpu");
            assert_eq!(
                proposals,
                &vec![
                    ("web".to_string(), "1".to_string()),
                    ("web/app".to_string(), "1.5".to_string())
                ]
            );
        }
        other => panic!("expected write conflict, got {:?}", other),
    }
}

#[test]
fn test_agreeing_container_writes_merge() {
    let cpu = || vec![setting(SettingName::Cpu, 0.1, 2.0, 0.1)];
    let bare = component("web", cpu(), vec![]);
    let app = component("web/app", cpu(), vec![]);
    let snapshot = snapshot();
    let bare_state = state_of(&bare, &snapshot);
    let app_state = state_of(&app, &snapshot);

    let mut target = TargetConfiguration::new();
    target.set("web", "cpu", json!(1));
    target.set("web/app", "cpu", json!("1.0"));

    let translation = PatchTranslator::new(&target, true)
        .translate(&[(&bare, &bare_state), (&app, &app_state)]);

    let patch = patch_for(&translation, "web");
    assert_eq!(patch.containers["app"].resources["cpu"], "1");
    assert_eq!(patch.change_count(), 1);
}

#[test]
fn test_replica_target_out_of_range() {
    let spec = full_component();
    let mut target = TargetConfiguration::new();
    target.set("web/app", "replicas", json!(9));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    assert!(matches!(
        translation.components["web/app"].failures[0],
        TuningError::OutOfRange { .. }
    ));
    assert_eq!(patch_for(&translation, "web").replicas, None);
}

#[test]
fn test_env_default_written_on_first_adjustment() {
    let spec = component("web/app", vec![], vec![range_env("COMMIT_DELAY", Some("20"), None)]);
    let translation = translate_one(&spec, &snapshot(), &TargetConfiguration::new(), true);

    let app = &patch_for(&translation, "web").containers["app"];
    assert_eq!(app.env["COMMIT_DELAY"], "20");
    assert_eq!(
        translation.components["web/app"].settings["COMMIT_DELAY"].value,
        Value::Null
    );
}

#[test]
fn test_env_target_wins_over_default() {
    let spec = component("web/app", vec![], vec![range_env("COMMIT_DELAY", Some("20"), None)]);
    let mut target = TargetConfiguration::new();
    target.set("web/app", "COMMIT_DELAY", json!(35));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    let app = &patch_for(&translation, "web").containers["app"];
    assert_eq!(app.env["COMMIT_DELAY"], "35");
}

#[test]
fn test_env_without_target_or_default_is_untouched() {
    let spec = component("web/app", vec![], vec![range_env("COMMIT_DELAY", None, None)]);
    let translation = translate_one(&spec, &snapshot(), &TargetConfiguration::new(), true);

    assert!(translation.components["web/app"].failures.is_empty());
    assert!(patch_for(&translation, "web").is_empty());
}

#[test]
fn test_env_default_not_reapplied_over_live_value() {
    let mut snapshot = snapshot();
    snapshot.containers[0].env.insert(
        "COMMIT_DELAY".to_string(),
        EnvSource::Literal("50ms".to_string()),
    );
    let spec = component(
        "web/app",
        vec![],
        vec![range_env("COMMIT_DELAY", Some("20"), Some("ms"))],
    );

    let translation = translate_one(&spec, &snapshot, &TargetConfiguration::new(), true);
    assert!(patch_for(&translation, "web").is_empty());
    assert_eq!(
        translation.components["web/app"].settings["COMMIT_DELAY"].value,
        json!(50.0)
    );
}

#[test]
fn test_env_unit_is_appended_on_write() {
    let spec = component(
        "web/app",
        vec![],
        vec![range_env("COMMIT_DELAY", None, Some("ms"))],
    );
    let mut target = TargetConfiguration::new();
    target.set("web/app", "COMMIT_DELAY", json!(15));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    assert_eq!(
        patch_for(&translation, "web").containers["app"].env["COMMIT_DELAY"],
        "15ms"
    );
}

#[test]
fn test_enum_env_rejects_unknown_value() {
    let spec = full_component();
    let mut target = TargetConfiguration::new();
    target.set("web/app", "GC", json!("SerialGC"));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    assert!(matches!(
        translation.components["web/app"].failures[0],
        TuningError::OutOfRange { ref allowed, .. } if allowed.contains("ParallelGC")
    ));

    let mut target = TargetConfiguration::new();
    target.set("web/app", "GC", json!("ParallelGC"));
    let translation = translate_one(&spec, &snapshot(), &target, true);
    assert_eq!(
        patch_for(&translation, "web").containers["app"].env["GC"],
        "ParallelGC"
    );
}

#[test]
fn test_undeclared_settings_are_ignored() {
    let spec = component("web/app", vec![setting(SettingName::Cpu, 0.1, 2.0, 0.1)], vec![]);
    let mut target = TargetConfiguration::new();
    target.set("web/app", "mem", json!(1));
    target.set("web/app", "replicas", json!(4));
    target.set("web/app", "GC", json!("ParallelGC"));

    let translation = translate_one(&spec, &snapshot(), &target, true);
    assert!(patch_for(&translation, "web").is_empty());
    assert!(translation.components["web/app"].failures.is_empty());
}
