use std::path::PathBuf;

use anyhow::{Context, Result};
use assert_cmd::Command;
use serde_json::Value;

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name)
}

#[test]
fn snapshot_cli_emits_settled_json() -> Result<()> {
    let output = Command::cargo_bin("punchpass")?
        .env_remove("PUNCHPASS_CATEGORY_FILTER")
        .arg("snapshot")
        .arg("--fixture")
        .arg(demo("household.json"))
        .arg("--json")
        .output()?;

    assert!(
        output.status.success(),
        "snapshot failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let snapshot: Value =
        serde_json::from_slice(&output.stdout).context("parse snapshot json from stdout")?;
    assert_eq!(snapshot["aggregate"]["activeTotal"], 2);
    assert_eq!(snapshot["aggregate"]["completedTotal"], 1);
    assert_eq!(snapshot["active"]["status"], "ready");
    assert_eq!(snapshot["cardTitle"], "Punch Passes for Lee Household");
    Ok(())
}

#[test]
fn snapshot_cli_prints_section_labels() -> Result<()> {
    let output = Command::cargo_bin("punchpass")?
        .arg("snapshot")
        .arg("--fixture")
        .arg(demo("household.json"))
        .output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Ann Lee - 2 Active Passes"), "stdout: {stdout}");
    assert!(stdout.contains("Bo Lee - 0 Active Passes"), "stdout: {stdout}");
    assert!(stdout.contains("Bo Lee - 1 Completed Pass"), "stdout: {stdout}");
    Ok(())
}

#[test]
fn action_cli_reports_navigation() -> Result<()> {
    let output = Command::cargo_bin("punchpass")?
        .arg("--config")
        .arg(demo("config.json"))
        .arg("action")
        .arg("--fixture")
        .arg(demo("household.json"))
        .arg("download_receipt")
        .args(["--pass", "a0P5e00000Swim1"])
        .output()?;

    assert!(
        output.status.success(),
        "action failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let outcome: Value = serde_json::from_slice(&output.stdout).context("parse action json")?;
    assert_eq!(
        outcome["navigations"][0]["url"],
        "https://ymca.my.site.com/members/servlet/servlet.FileDownload?file=0155e00000Doc01"
    );
    assert_eq!(outcome["navigations"][0]["target"], "same-tab");
    assert_eq!(outcome["action"]["documentId"], "0155e00000Doc01");
    Ok(())
}

#[test]
fn action_cli_rejects_unknown_command() -> Result<()> {
    let output = Command::cargo_bin("punchpass")?
        .arg("action")
        .arg("--fixture")
        .arg(demo("household.json"))
        .arg("refund_pass")
        .args(["--pass", "a0P5e00000Swim1"])
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ACTION/UNKNOWN_COMMAND"), "stderr: {stderr}");
    Ok(())
}
