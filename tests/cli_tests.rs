use std::io::Write;
use std::process::{Command, Output};

fn afl_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_afl"))
}

fn write_temp(content: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    f.write_all(content.as_bytes()).expect("write temp file");
    f
}

fn write_temp_rule(content: &str) -> tempfile::NamedTempFile {
    write_temp(content, ".afl")
}

fn afl(args: &[&str]) -> Output {
    afl_binary().args(args).output().expect("run afl")
}

#[test]
fn test_cli_eval_inline() {
    let output = afl(&["eval", "-e", "1 + 2 == 3"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("true"), "stdout: {}", stdout);
    assert!(stdout.contains("matched: true"), "stdout: {}", stdout);
}

#[test]
fn test_cli_eval_with_vars_json() {
    let rule = write_temp_rule("lcase(user_name) == 'spammer' & added_lines contains 'pills'\n");
    let vars = write_temp(
        r#"{"user_name": "Spammer", "added_lines": "cheap pills"}"#,
        ".json",
    );
    let output = afl(&[
        "eval",
        rule.path().to_str().unwrap(),
        "--vars",
        vars.path().to_str().unwrap(),
        "--json",
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let report: serde_json::Value = serde_json::from_str(stdout.trim()).expect("json output");
    assert_eq!(report["matched"], serde_json::Value::Bool(true));
    assert_eq!(report["conditions"], serde_json::json!(4));
}

#[test]
fn test_cli_error_output_formatted() {
    let output = afl(&["eval", "-e", "undefined_function(1, 2)"]);
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    // Must contain miette-formatted output, not raw Debug
    assert!(
        stderr.contains("unknown function"),
        "expected 'unknown function' in stderr, got: {}",
        stderr
    );
    assert!(
        !stderr.contains("UnknownFunction {"),
        "stderr contains raw Debug output: {}",
        stderr
    );
    assert!(
        stderr.contains("E0101"),
        "expected error code E0101 in stderr, got: {}",
        stderr
    );
}

#[test]
fn test_cli_condition_limit_flag() {
    let output = afl(&["eval", "-e", "1 == 1 & 2 == 2", "--max-conditions", "2"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("condition limit exceeded"), "stderr: {}", stderr);
}

#[test]
fn test_cli_config_file() {
    let config = write_temp(r#"{"limits": {"max_conditions": 1}}"#, ".json");
    let output = afl(&[
        "eval",
        "-e",
        "1 == 1 & 2 == 2",
        "--config",
        config.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));

    // flags override the file
    let output = afl(&[
        "eval",
        "-e",
        "1 == 1 & 2 == 2",
        "--config",
        config.path().to_str().unwrap(),
        "--max-conditions",
        "10",
    ]);
    assert!(output.status.success());
}

#[test]
fn test_cli_missing_file_is_io_error() {
    let output = afl(&["check", "/nonexistent/rule.afl"]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"), "stderr: {}", stderr);
}

#[test]
fn test_cli_check_reports_warnings() {
    let f = write_temp_rule("user_nmae == 'x'\n");
    let output = afl(&[
        "check",
        f.path().to_str().unwrap(),
        "--reserved",
        "user_name,action",
    ]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown-variable"), "stderr: {}", stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok (1 warning, 1 conditions)"), "stdout: {}", stdout);
}

#[test]
fn test_cli_check_syntax_error() {
    let f = write_temp_rule("a & (b\n");
    let output = afl(&["check", f.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_cli_fmt_check_and_write() {
    let f = write_temp_rule("a==1&b");
    let path = f.path().to_str().unwrap();

    let output = afl(&["fmt", path]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "a == 1 & b\n");

    let output = afl(&["fmt", "--check", path]);
    assert_eq!(output.status.code(), Some(1));

    let output = afl(&["fmt", "--write", path]);
    assert!(output.status.success());
    assert_eq!(std::fs::read_to_string(path).unwrap(), "a == 1 & b\n");

    let output = afl(&["fmt", "--check", path]);
    assert!(output.status.success());
}

#[test]
fn test_cli_lex_and_parse() {
    let f = write_temp_rule("x := 'a' /* note */\n");
    let path = f.path().to_str().unwrap();

    let output = afl(&["lex", path]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Tokens from"));
    assert!(stdout.contains(":="), "stdout: {}", stdout);

    let output = afl(&["parse", path]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Assign"), "stdout: {}", stdout);
    assert!(stdout.contains("Conditions: 0"), "stdout: {}", stdout);
}

#[test]
fn test_cli_parse_and_fmt_honour_config_depth() {
    let rule = write_temp_rule("((1))\n");
    let rule_path = rule.path().to_str().unwrap();
    let config = write_temp(r#"{"max_parse_depth": 2}"#, ".json");
    let config_path = config.path().to_str().unwrap();

    for command in ["parse", "fmt", "check"] {
        let output = afl(&[command, rule_path]);
        assert!(output.status.success(), "{} without config failed", command);

        let output = afl(&[command, rule_path, "--config", config_path]);
        assert_eq!(output.status.code(), Some(1), "{} ignored --config", command);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("nesting too deep"), "stderr: {}", stderr);
    }

    let output = afl(&["eval", "-e", "((1))", "--config", config_path]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_cli_rejects_oversized_depth_config() {
    let rule = write_temp_rule("1\n");
    let config = write_temp(r#"{"max_parse_depth": 2000}"#, ".json");
    let output = afl(&[
        "parse",
        rule.path().to_str().unwrap(),
        "--config",
        config.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max_parse_depth must be at most 256"), "stderr: {}", stderr);
}
