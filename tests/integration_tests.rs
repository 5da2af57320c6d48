//! Integration tests: CLI smoke tests and pre-build validation scenarios.

mod common;

use std::fs;

use serde_json::Value;

fn code(result: &common::CmdResult) -> Option<i32> {
    result.status.code()
}

fn json_line(result: &common::CmdResult) -> Value {
    serde_json::from_str(result.stdout.trim()).unwrap_or_else(|e| {
        panic!("stdout is not JSON ({e}); log: {}", result.log_path.display())
    })
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: tvla-run [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stdout.contains("tvla-run"),
        "missing version output; log: {}",
        result.log_path.display()
    );
}

#[test]
fn subcommand_help_flags_work() {
    for subcommand in ["run", "status", "results", "completions"] {
        let result = common::run_cli_case(
            &format!("subcommand_help_{subcommand}"),
            &[subcommand, "--help"],
        );
        assert!(
            result.status.success(),
            "{subcommand} --help failed; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn two_test_cases_fail_before_any_build() {
    let tmp = tempfile::tempdir().unwrap();
    let filelist = common::design_fixture(tmp.path());
    let test_root = tmp.path().join("out");

    let result = common::run_cli_case(
        "two_test_cases_fail_before_any_build",
        &[
            "run",
            filelist.to_str().unwrap(),
            "--top",
            "aes",
            "--test-module",
            "aes_tb",
            "--test-cases",
            "test_a",
            "test_b",
            "--test-root",
            test_root.to_str().unwrap(),
        ],
    );

    assert_eq!(code(&result), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("TVH-1201"), "log: {}", result.log_path.display());
    assert!(!test_root.join("sim_build").exists());
    assert!(!test_root.exists());
}

#[test]
fn missing_filelist_is_a_user_error() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nope.f");
    let result = common::run_cli_case(
        "missing_filelist_is_a_user_error",
        &[
            "run",
            missing.to_str().unwrap(),
            "--test-module",
            "tb",
            "--test-cases",
            "t",
        ],
    );
    assert_eq!(code(&result), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("TVH-1101"), "log: {}", result.log_path.display());
}

#[test]
fn pinned_seed_with_multi_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let filelist = common::design_fixture(tmp.path());
    let test_root = tmp.path().join("out");
    let result = common::run_cli_case(
        "pinned_seed_with_multi_is_rejected",
        &[
            "run",
            filelist.to_str().unwrap(),
            "--top",
            "aes",
            "--test-module",
            "tb",
            "--test-cases",
            "t",
            "--seed",
            "7",
            "--multi",
            "4",
            "--test-root",
            test_root.to_str().unwrap(),
        ],
    );
    assert_eq!(code(&result), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("TVH-1202"), "log: {}", result.log_path.display());
    assert!(!test_root.exists());
}

#[test]
fn non_numeric_run_count_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let filelist = common::design_fixture(tmp.path());
    for (name, value) in [("zero", "0"), ("word", "many")] {
        let result = common::run_cli_case(
            &format!("non_numeric_run_count_{name}"),
            &[
                "run",
                filelist.to_str().unwrap(),
                "--top",
                "aes",
                "--test-module",
                "tb",
                "--test-cases",
                "t",
                "--multi",
                value,
            ],
        );
        assert_eq!(code(&result), Some(1), "log: {}", result.log_path.display());
        assert!(result.stderr.contains("TVH-1203"), "log: {}", result.log_path.display());
    }
}

#[test]
fn missing_top_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let filelist = common::design_fixture(tmp.path());
    let result = common::run_cli_case(
        "missing_top_is_reported",
        &[
            "run",
            filelist.to_str().unwrap(),
            "--test-module",
            "tb",
            "--test-cases",
            "t",
        ],
    );
    assert_eq!(code(&result), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("TVH-1105"), "log: {}", result.log_path.display());
}

#[test]
fn unlaunchable_compiler_fails_the_build() {
    let tmp = tempfile::tempdir().unwrap();
    let filelist = common::design_fixture(tmp.path());
    let test_root = tmp.path().join("out");
    let config = tmp.path().join("tvla.toml");
    fs::write(
        &config,
        "[build]\nverilator_bin = \"/nonexistent/bin/verilator\"\n",
    )
    .unwrap();

    let result = common::run_cli_case(
        "unlaunchable_compiler_fails_the_build",
        &[
            "--config",
            config.to_str().unwrap(),
            "run",
            filelist.to_str().unwrap(),
            "--top",
            "aes",
            "--test-module",
            "tb",
            "--test-cases",
            "t",
            "--test-root",
            test_root.to_str().unwrap(),
        ],
    );
    assert_eq!(code(&result), Some(2), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("TVH-2002"), "log: {}", result.log_path.display());
    // No run directory is created when the build fails.
    assert!(!test_root.join("t").exists());
}

#[test]
fn missing_explicit_config_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let filelist = common::design_fixture(tmp.path());
    let result = common::run_cli_case(
        "missing_explicit_config_is_reported",
        &[
            "--config",
            tmp.path().join("absent.toml").to_str().unwrap(),
            "status",
            filelist.to_str().unwrap(),
            "--top",
            "aes",
        ],
    );
    assert_eq!(code(&result), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("TVH-1002"), "log: {}", result.log_path.display());
}

#[test]
fn results_command_reports_failures() {
    let tmp = tempfile::tempdir().unwrap();
    let xml = tmp.path().join("results.xml");
    fs::write(
        &xml,
        r#"<testsuites>
  <testsuite random_seed="42">
    <testcase name="test_enc" classname="aes_tb" time="1.0" sim_time_ns="500">
      <failure message="mismatch"/>
    </testcase>
  </testsuite>
</testsuites>"#,
    )
    .unwrap();

    let result = common::run_cli_case(
        "results_command_reports_failures",
        &["results", xml.to_str().unwrap(), "--json"],
    );
    assert_eq!(code(&result), Some(4), "log: {}", result.log_path.display());

    let payload = json_line(&result);
    assert_eq!(payload["command"], "results");
    assert_eq!(payload["summary"]["failures"], 1);
    assert_eq!(payload["summary"]["errors"], 0);
    let case = &payload["files"][0]["suites"][0]["test_cases"][0];
    assert_eq!(case["status"], "FAILURE");
    assert_eq!(case["ratio_time"].as_f64(), Some(500.0));
    assert_eq!(payload["files"][0]["suites"][0]["random_seed"], 42);
}

#[test]
fn results_command_accepts_passing_document() {
    let tmp = tempfile::tempdir().unwrap();
    let xml = tmp.path().join("results.xml");
    fs::write(
        &xml,
        r#"<testsuites><testsuite><testcase name="a" time="0"/></testsuite></testsuites>"#,
    )
    .unwrap();

    let result = common::run_cli_case(
        "results_command_accepts_passing_document",
        &["results", xml.to_str().unwrap()],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = json_line(&result);
    let case = &payload["files"][0]["suites"][0]["test_cases"][0];
    assert_eq!(case["status"], "PASSED");
    assert_eq!(case["ratio_time"].as_f64(), Some(0.0));
    assert_eq!(payload["files"][0]["suites"][0]["random_seed"], Value::Null);
}

#[test]
fn status_reports_missing_build() {
    let tmp = tempfile::tempdir().unwrap();
    let filelist = common::design_fixture(tmp.path());
    let test_root = tmp.path().join("out");

    let result = common::run_cli_case(
        "status_reports_missing_build",
        &[
            "status",
            filelist.to_str().unwrap(),
            "--top",
            "aes",
            "--test-root",
            test_root.to_str().unwrap(),
            "--test-case",
            "test_enc",
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let payload = json_line(&result);
    assert_eq!(payload["freshness"], "missing_build_dir");
    assert_eq!(payload["needs_rebuild"], true);
    assert_eq!(payload["sources"], 1);
    assert_eq!(payload["history"]["run_dirs"], 0);
    assert_eq!(payload["history"]["manifest_entries"], 0);
}

#[test]
fn completions_generate_for_bash() {
    let result = common::run_cli_case("completions_generate_for_bash", &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("tvla-run"));
}

#[cfg(unix)]
fn silent_batch(case: &str, extra: &[&str]) -> Option<(common::CmdResult, tempfile::TempDir)> {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::silent_toolchain(tmp.path())?;
    let filelist = common::design_fixture(tmp.path());
    let test_root = tmp.path().join("out");
    let mut args = vec![
        "--config",
        config.to_str().unwrap(),
        "run",
        filelist.to_str().unwrap(),
        "--top",
        "aes",
        "--test-module",
        "aes_tb",
        "--test-cases",
        "test_enc",
        "--test-root",
        test_root.to_str().unwrap(),
        "-j",
        "2",
    ];
    args.extend_from_slice(extra);
    Some((common::run_cli_case(case, &args), tmp))
}

#[cfg(unix)]
#[test]
fn batch_without_results_still_succeeds() {
    let Some((result, tmp)) = silent_batch("batch_without_results_still_succeeds", &["--seed", "4660"])
    else {
        return;
    };
    assert_eq!(code(&result), Some(0), "log: {}", result.log_path.display());

    let payload = json_line(&result);
    let runs = payload["batch"]["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    for run in runs {
        assert_eq!(run["result_file"], Value::Null);
    }
    let case_dir = tmp.path().join("out").join("test_enc");
    assert!(case_dir.join("00001234").is_dir());
    assert!(case_dir.join("00001234_no_random").is_dir());
}

#[cfg(unix)]
#[test]
fn strict_batch_without_results_exits_partial() {
    let Some((result, _tmp)) =
        silent_batch("strict_batch_without_results_exits_partial", &["--strict"])
    else {
        return;
    };
    assert_eq!(code(&result), Some(4), "log: {}", result.log_path.display());
    assert!(
        result.stderr.contains("2 of 2 runs"),
        "log: {}",
        result.log_path.display()
    );
}

#[cfg(unix)]
#[test]
fn multi_batch_without_metadata_fails() {
    let Some((result, tmp)) = silent_batch(
        "multi_batch_without_metadata_fails",
        &["--multiple-runs", "3"],
    ) else {
        return;
    };
    assert_eq!(code(&result), Some(2), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("TVH-3004"), "log: {}", result.log_path.display());
    let manifest = tmp.path().join("out/test_enc/multi/meta.list");
    assert!(!manifest.exists() || fs::read_to_string(&manifest).unwrap().is_empty());
}
