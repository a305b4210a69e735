use std::process::Command;

fn temp_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "nearmiss-cli-{label}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ))
}

#[test]
fn cli_json_report_passes_for_balanced_run() {
    let exe = env!("CARGO_BIN_EXE_nearmiss-tester");
    let output_path = temp_path("json");
    let status = Command::new(exe)
        .args([
            "--participants",
            "8",
            "--seeds",
            "1,2",
            "--report",
            "json",
            "--output",
        ])
        .arg(&output_path)
        .status()
        .expect("run cli");
    assert!(status.success());
    let content = std::fs::read_to_string(&output_path).expect("read output");
    let report: serde_json::Value = serde_json::from_str(&content).expect("json report");
    assert_eq!(report["passed"], true);
    assert_eq!(report["seeds"].as_array().map(Vec::len), Some(2));
    assert_eq!(report["seeds"][0]["participants"], 8);
    let _ = std::fs::remove_file(output_path);
}

#[test]
fn cli_markdown_report_for_forced_condition() {
    let exe = env!("CARGO_BIN_EXE_nearmiss-tester");
    let output_path = temp_path("markdown");
    let status = Command::new(exe)
        .args([
            "--participants",
            "3",
            "--policy",
            "erratic",
            "--force-condition",
            "luck:near_miss",
            "--report",
            "markdown",
            "--output",
        ])
        .arg(&output_path)
        .status()
        .expect("run cli");
    assert!(status.success());
    let content = std::fs::read_to_string(&output_path).expect("read output");
    assert!(content.contains("# Near-Miss Experiment Simulation"));
    assert!(content.contains("- **Policy**: Erratic"));
    assert!(content.contains("- **Failed**: 0"));
    let _ = std::fs::remove_file(output_path);
}

#[test]
fn cli_rejects_unknown_forced_condition() {
    let exe = env!("CARGO_BIN_EXE_nearmiss-tester");
    let output = Command::new(exe)
        .args(["--participants", "1", "--force-condition", "chess:near_miss"])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown condition"));
}

#[test]
fn cli_data_dir_writes_jsonl_records() {
    let exe = env!("CARGO_BIN_EXE_nearmiss-tester");
    let data_dir = temp_path("data");
    let output_path = temp_path("data-report");
    let status = Command::new(exe)
        .args(["--participants", "4", "--seeds", "5", "--output"])
        .arg(&output_path)
        .arg("--data-dir")
        .arg(&data_dir)
        .status()
        .expect("run cli");
    assert!(status.success());

    let seed_dir = data_dir.join("seed-5");
    let files: Vec<_> = std::fs::read_dir(&seed_dir)
        .expect("seed dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    assert_eq!(files.len(), 4);
    for entry in files {
        let text = std::fs::read_to_string(entry.path()).expect("read records");
        assert!(text.lines().any(|line| line.contains("\"record_type\":\"summary\"")));
    }
    let _ = std::fs::remove_dir_all(data_dir);
    let _ = std::fs::remove_file(output_path);
}

#[test]
fn cli_reads_config_file() {
    let exe = env!("CARGO_BIN_EXE_nearmiss-tester");
    let config_path = temp_path("config.json");
    std::fs::write(
        &config_path,
        r#"{"max_trials": 6, "self_report_interval": 3,
            "slot": {"template": {"hit": 2, "near_miss": 2, "loss": 2}}}"#,
    )
    .expect("write config");
    let output_path = temp_path("config-report");
    let status = Command::new(exe)
        .args(["--participants", "4", "--report", "json", "--config"])
        .arg(&config_path)
        .arg("--output")
        .arg(&output_path)
        .status()
        .expect("run cli");
    assert!(status.success());
    let content = std::fs::read_to_string(&output_path).expect("read output");
    assert!(content.contains("\"passed\": true"));
    let _ = std::fs::remove_file(config_path);
    let _ = std::fs::remove_file(output_path);
}
