//! CLI commands against real captures and configuration files.

use ambit::cli::{map_error, Commands, RunContext};
use ambit::registry::Registry;
use ambit::types::PropagationMode;
use ambit::wire::{RecordWriter, WirePropagator};
use std::path::PathBuf;
use tempfile::TempDir;

use crate::integration::test_utils::flow_as;

fn write_capture(dir: &TempDir) -> PathBuf {
    let mut bytes = Vec::new();
    WirePropagator::new(Registry::with_standard_types())
        .send_request(&flow_as("sam"), &mut bytes, PropagationMode::Rmi)
        .unwrap();
    let path = dir.path().join("request.bin");
    std::fs::write(&path, bytes).unwrap();
    path
}

fn inspect(capture: PathBuf, format: &str) -> Commands {
    Commands::Inspect {
        capture,
        format: format.to_string(),
        preview_bytes: 8,
    }
}

#[test]
fn test_inspect_text_shows_propagated_identity() {
    let temp = TempDir::new().unwrap();
    let capture = write_capture(&temp);
    let ctx = RunContext::new(temp.path().to_path_buf(), None).unwrap();

    let output = ctx.execute(&inspect(capture, "text")).unwrap();
    assert!(output.starts_with("Records: "));
    assert!(output.contains("sam"));
    assert!(output.contains("Warnings: 0"));
}

#[test]
fn test_inspect_json_is_machine_readable() {
    let temp = TempDir::new().unwrap();
    let capture = write_capture(&temp);
    let size = std::fs::metadata(&capture).unwrap().len();
    let ctx = RunContext::new(temp.path().to_path_buf(), None).unwrap();

    let output = ctx.execute(&inspect(capture, "json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["bytes_read"], size);
    assert!(json["framing_error"].is_null());
    let records = json["records"].as_array().unwrap();
    assert!(records.iter().all(|r| r["known"] == true));
    assert!(records
        .iter()
        .all(|r| r["preview"].as_str().unwrap().len() <= 16));
}

#[test]
fn test_inspect_reports_truncated_capture() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("cut.bin");
    let mut writer = RecordWriter::new(Vec::new());
    writer.write_record("naming", 1, &[1, 2, 3, 4]).unwrap();
    let bytes = writer.into_inner();
    std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
    let ctx = RunContext::new(temp.path().to_path_buf(), None).unwrap();

    let output = ctx.execute(&inspect(path, "text")).unwrap();
    assert!(output.contains("Framing error"));
}

#[test]
fn test_inspect_missing_capture_fails() {
    let temp = TempDir::new().unwrap();
    let ctx = RunContext::new(temp.path().to_path_buf(), None).unwrap();
    assert!(ctx
        .execute(&inspect(temp.path().join("absent.bin"), "text"))
        .is_err());
}

#[test]
fn test_check_config_lists_every_resource() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("ambit.toml");
    std::fs::write(
        &file,
        r#"
        [executors.orders]
        context_info = "Security"

        [scheduled_executors.nightly]
        context_info = "Naming"

        [thread_factories.reports]
        context_info = "Naming"

        [context_services.audit]
        unchanged = "Remaining"
        "#,
    )
    .unwrap();
    let ctx = RunContext::new(temp.path().to_path_buf(), Some(file)).unwrap();

    let text = ctx
        .execute(&Commands::CheckConfig {
            format: "text".into(),
        })
        .unwrap();
    assert!(text.contains("4 managed resource(s)"));
    assert!(text.contains("executor orders"));
    assert!(text.contains("scheduled_executor nightly"));
    assert!(text.contains("thread_factory reports"));
    assert!(text.contains("context_service audit"));

    let json = ctx
        .execute(&Commands::CheckConfig {
            format: "json".into(),
        })
        .unwrap();
    let resources: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(resources.as_array().unwrap().len(), 4);
    assert_eq!(resources[0]["context_service"], "orders-ContextService");
    assert_eq!(resources[1]["kind"], "scheduled_executor");
    assert_eq!(resources[1]["context_service"], "nightly-ContextService");
}

#[test]
fn test_invalid_config_maps_to_plain_message() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("ambit.toml");
    std::fs::write(&file, "[executors.bad]\ncore_pool_size = 8\nmaximum_pool_size = 2\n").unwrap();
    let ctx = RunContext::new(temp.path().to_path_buf(), Some(file)).unwrap();

    let err = ctx
        .execute(&Commands::CheckConfig {
            format: "text".into(),
        })
        .unwrap_err();
    let message = map_error(&err);
    assert!(message.contains("Configuration is invalid (1 error(s)):"));
    assert!(message.contains("bad"));
}
