//! Loading partitioner output from disk and uploading it

use setu::config::{InputConfig, TimingConfig, UploadConfig};
use setu::devices::DeviceSimulator;
use setu::input::{load_records, resolve_input_path};
use setu::{Error, Mode, SessionDriver, UploadRecords};
use std::fs;
use std::path::Path;

const COORDINATOR_FILE: &str = r#"{"mapping": [{"count": [1], "map": [[3]], "padding_pos": [[]], "end_pos": null, "zero_point": [0], "scale": [1.5]}, {"count": [2, 2], "map": [[1], [2]], "padding_pos": [[0], []], "end_pos": [[4, 4]], "zero_point": [7], "scale": [0.125]}]}

{"mapping": [{"count": [1], "map": [[3]], "padding_pos": [[]], "end_pos": [], "zero_point": [0], "scale": [1.5]}]}
{"mapping": [{"count": [1], "map": [[3]], "padding_pos": [[]], "end_pos": [], "zero_point": [0], "scale": [1.5]}, {"count": [1], "map": [[340282366920938463463374607431768211455]], "padding_pos": [[2]], "end_pos": [], "zero_point": [1], "scale": [2]}]}
"#;

const WORKER_FILE: &str = r#"{"weights": [{"data": [1, 2, 3], "bias": 0, "which_kernel": 0, "count": 3, "start_pos_in": [], "info": {"Linear": {"b_in": 1, "c_in": 3, "b_out": 1, "c_out": 1}}, "zero_points": [0, 0, 0], "m": 1, "s_out": 0}]}
{"weights": [{"data": [4], "bias": 9, "which_kernel": 1, "count": 1, "info": {"Linear": {"b_in": 1, "c_in": 1, "b_out": 1, "c_out": 1}}, "zero_points": [1, 2, 3], "m": 0.5, "s_out": 2}]}
"#;

fn write_inputs(dir: &Path) {
    fs::write(dir.join("Coordinator.json"), COORDINATOR_FILE).unwrap();
    fs::write(dir.join("worker_4.json"), WORKER_FILE).unwrap();
}

fn input_config(dir: &Path) -> InputConfig {
    InputConfig {
        data_dir: dir.to_path_buf(),
        ..InputConfig::default()
    }
}

#[test]
fn test_coordinator_file_upload() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());

    let path = resolve_input_path(&input_config(dir.path()), Mode::Coordinator, 1);
    let records = load_records(&path, Mode::Coordinator).unwrap();
    assert_eq!(records.len(), 3);

    let sim = DeviceSimulator::new();
    let driver = SessionDriver::new(TimingConfig::immediate());
    let outcome = driver.run(sim.clone(), Mode::Coordinator, 1, &records);

    assert!(outcome.is_success());
    assert_eq!(outcome.report.records_sent, 2);
    assert_eq!(outcome.report.lines_skipped, 1);

    let mappings = sim.mappings();
    assert_eq!(mappings.len(), 2);
    assert_eq!(mappings[0].end_pos, vec![vec!["4".to_string(), "4".to_string()]]);
    assert_eq!(
        mappings[1].map,
        vec![vec!["340282366920938463463374607431768211455".to_string()]]
    );
}

#[test]
fn test_worker_file_upload() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());

    let path = resolve_input_path(&input_config(dir.path()), Mode::Worker, 4);
    let records = load_records(&path, Mode::Worker).unwrap();
    let UploadRecords::Worker(lines) = &records else {
        panic!("expected worker records");
    };
    assert!(lines.iter().all(|l| l.weights[0].start_pos_in.is_none()));

    let sim = DeviceSimulator::new();
    let driver = SessionDriver::new(TimingConfig::immediate());
    let outcome = driver.run(sim.clone(), Mode::Worker, 4, &records);

    assert!(outcome.is_success());
    assert_eq!(
        outcome.last_response(),
        Some("Worker download complete: 2 lines, 2 blocks")
    );
    assert_eq!(sim.weight_lines()[1][0].data, vec!["4".to_string()]);
}

#[test]
fn test_missing_worker_file() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());

    let path = resolve_input_path(&input_config(dir.path()), Mode::Worker, 5);
    assert!(matches!(
        load_records(&path, Mode::Worker),
        Err(Error::InputNotFound(_))
    ));
}

#[test]
fn test_bad_start_position_is_rejected_before_upload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker_0.json");
    fs::write(&path, WORKER_FILE.replace(r#""start_pos_in": []"#, r#""start_pos_in": [1, 2]"#))
        .unwrap();

    match load_records(&path, Mode::Worker) {
        Err(Error::MalformedRecord { line, .. }) => assert_eq!(line, 1),
        other => panic!("expected malformed record, got {:?}", other),
    }
}

#[test]
fn test_undecodable_end_positions_are_rejected_before_upload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Coordinator.json");
    let text = COORDINATOR_FILE.replace(r#""end_pos": [[4, 4]]"#, r#""end_pos": [[]]"#);
    fs::write(&path, text).unwrap();

    match load_records(&path, Mode::Coordinator) {
        Err(Error::MalformedRecord { line, source, .. }) => {
            assert_eq!(line, 1);
            assert!(source.to_string().contains("end_pos"));
        }
        other => panic!("expected malformed record, got {:?}", other),
    }
}

#[test]
fn test_config_file_drives_input_discovery() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    fs::rename(dir.path().join("worker_4.json"), dir.path().join("w4.jsonl")).unwrap();

    let config_path = dir.path().join("setu.toml");
    fs::write(
        &config_path,
        format!(
            "[input]\ndata_dir = {:?}\nworker_file_pattern = \"w{{id}}.jsonl\"\n\n[timing]\nsettle_delay_ms = 0\nresponse_timeout_ms = 50\n",
            dir.path().display().to_string()
        ),
    )
    .unwrap();

    let config = UploadConfig::from_file(&config_path).unwrap();
    let path = resolve_input_path(&config.input, Mode::Worker, 4);
    assert_eq!(path, dir.path().join("w4.jsonl"));

    let records = load_records(&path, Mode::Worker).unwrap();
    let outcome = SessionDriver::new(config.timing).run(
        DeviceSimulator::new(),
        Mode::Worker,
        4,
        &records,
    );
    assert!(outcome.is_success());
    assert_eq!(outcome.report.records_sent, 2);
}
