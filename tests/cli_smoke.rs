use std::process::Command;

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_lightwave_cli"))
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8(stdout.to_vec())
        .expect("stdout UTF-8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("JSON line"))
        .collect()
}

#[test]
fn synth_prints_frames_then_summary() {
    let output = cli()
        .args(["synth", "--pattern", "sine", "--seconds", "1", "--every", "25"])
        .output()
        .expect("failed to run lightwave_cli synth");
    assert!(
        output.status.success(),
        "CLI exited with {:?}",
        output.status.code()
    );

    let lines = json_lines(&output.stdout);
    let (summary, frames) = lines.split_last().expect("at least a summary line");
    assert_eq!(summary["type"], "summary");
    assert_eq!(summary["stop_reason"], "Capture source exhausted");
    assert_eq!(summary["health"]["hops"], 125);
    assert_eq!(frames.len(), 5);
    assert!(frames.iter().all(|frame| frame["type"] == "frame"));
    assert_eq!(frames[1]["hop_index"], 25);
    assert_eq!(frames[0]["bands_fast"].as_array().map(Vec::len), Some(8));
}

#[test]
fn synth_reports_tempo_mismatch() {
    let output = cli()
        .args([
            "synth",
            "--pattern",
            "silence",
            "--seconds",
            "1",
            "--every",
            "0",
            "--expect-bpm",
            "400",
        ])
        .output()
        .expect("failed to run mismatch synth");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(stderr.contains("Tempo mismatch"), "stderr was {stderr}");
}

#[test]
fn replay_missing_file_fails() {
    let output = cli()
        .args(["replay", "--wav", "/nonexistent/lightwave.wav"])
        .output()
        .expect("failed to run replay");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(stderr.contains("loading replay file"), "stderr was {stderr}");
}
