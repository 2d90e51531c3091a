//! Equivalence of the embedded and external parsing engines.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};

use terrace_hcl::{EmbeddedParser, EngineSelection, ExternalParser, HclError, HclParser};
use terrace_runner::{CommandSpec, ProcessRunner, RunConfig, SystemRunner};

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

fn module_files() -> Vec<PathBuf> {
    ["versions.tf", "variables.tf", "main.tf", "outputs.tf"]
        .iter()
        .map(|name| fixtures().join("module").join(name))
        .collect()
}

fn expected_trees() -> BTreeMap<String, Value> {
    let raw = std::fs::read_to_string(fixtures().join("expected.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// The embedded engine yields the helper's tree shape for every fixture.
#[tokio::test]
async fn test_embedded_matches_expected_trees() {
    let expected = expected_trees();
    let outcome = EmbeddedParser::new()
        .parse_batch(&module_files())
        .await
        .unwrap();

    assert!(outcome.is_clean(), "{:?}", outcome.errors);
    for path in module_files() {
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(outcome.ok[&path], expected[name], "tree mismatch for {}", name);
    }
}

#[tokio::test]
async fn test_embedded_reports_broken_file_with_position() {
    let broken = fixtures().join("broken").join("main.tf");
    let mut paths = module_files();
    paths.push(broken.clone());

    let outcome = EmbeddedParser::new().parse_batch(&paths).await.unwrap();

    assert_eq!(outcome.ok.len(), 4);
    let message = &outcome.errors[&broken];
    assert!(!message.is_empty());
}

fn helper() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_terrace-hcl2json"))
}

/// The helper built from this package, driven through the process runner,
/// gives the expected trees and agrees with the embedded engine.
#[tokio::test]
async fn test_helper_and_embedded_agree() {
    let expected = expected_trees();
    let external = ExternalParser::new(helper(), Arc::new(SystemRunner::new()));
    let from_helper = external.parse_batch(&module_files()).await.unwrap();
    let from_embedded = EmbeddedParser::new()
        .parse_batch(&module_files())
        .await
        .unwrap();

    assert!(from_helper.is_clean(), "{:?}", from_helper.errors);
    for path in module_files() {
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(from_helper.ok[&path], expected[name], "tree mismatch for {}", name);
    }
    assert_eq!(from_helper, from_embedded);
}

#[tokio::test]
async fn test_helper_reports_failures_per_file() {
    let broken = fixtures().join("broken").join("main.tf");
    let missing = fixtures().join("module").join("absent.tf");
    let mut paths = module_files();
    paths.push(broken.clone());
    paths.push(missing.clone());

    let external = ExternalParser::new(helper(), Arc::new(SystemRunner::new()));
    let outcome = external.parse_batch(&paths).await.unwrap();

    assert_eq!(outcome.ok.len(), 4);
    assert!(!outcome.errors[&broken].is_empty());
    assert!(!outcome.errors[&missing].is_empty());
}

#[tokio::test]
async fn test_helper_stdin_mode() {
    let external = ExternalParser::new(helper(), Arc::new(SystemRunner::new()));

    let tree = external
        .parse_str("locals {\n  region = \"us-west-2\"\n}\n")
        .await
        .unwrap();
    assert_eq!(tree, json!({"locals": [{"region": "us-west-2"}]}));

    let broken = external.parse_str("locals {\n").await;
    assert!(matches!(broken, Err(HclError::Parse { .. })));
}

#[tokio::test]
async fn test_helper_exit_codes() {
    let runner = SystemRunner::new();
    let run = |spec: CommandSpec| {
        let runner = &runner;
        async move { runner.run(&spec, &RunConfig::default()).await.unwrap() }
    };
    let program = helper().to_string_lossy().into_owned();

    let no_paths = run(CommandSpec::new(&program).arg("--multi")).await;
    assert_eq!(no_paths.exit_code, 2);
    assert!(no_paths.stderr.contains("at least one file path"));

    let both = run(CommandSpec::new(&program).args(["--multi", "--stdin", "main.tf"])).await;
    assert_eq!(both.exit_code, 2);

    let two_files = run(CommandSpec::new(&program).args(["a.tf", "b.tf"])).await;
    assert_eq!(two_files.exit_code, 2);

    let unreadable = run(CommandSpec::new(&program).arg(
        fixtures().join("module").join("absent.tf").to_string_lossy(),
    ))
    .await;
    assert_eq!(unreadable.exit_code, 1);

    let single = run(CommandSpec::new(&program).arg(
        fixtures().join("module").join("versions.tf").to_string_lossy(),
    ))
    .await;
    assert!(single.success());
    let tree: Value = serde_json::from_str(&single.stdout).unwrap();
    assert_eq!(tree, expected_trees()["versions.tf"]);

    let partial = run(CommandSpec::new(&program).args([
        "--multi".to_string(),
        fixtures().join("broken").join("main.tf").to_string_lossy().into_owned(),
    ]))
    .await;
    assert_eq!(partial.exit_code, 0);
    let response: Value = serde_json::from_str(&partial.stdout).unwrap();
    assert_eq!(response["ok"], json!({}));
    assert_eq!(response["errors"].as_object().unwrap().len(), 1);
}

/// An explicit helper path wins over the search path.
#[test]
fn test_selection_uses_configured_helper() {
    let selection = EngineSelection::new()
        .with_override_binary(helper())
        .with_search_path("");
    assert_eq!(selection.locate_helper(), Some(helper()));
}
