use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

const TRIANGLE: &str = "  0\nSECTION\n  2\nENTITIES\n  0\nLINE\n 10\n0\n 20\n0\n 11\n10\n 21\n0\n  0\nLINE\n 10\n10\n 20\n0\n 11\n0\n 21\n5\n  0\nLINE\n 10\n0\n 20\n5\n 11\n0\n 21\n0\n  0\nENDSEC\n  0\nEOF\n";

fn dxfclean() -> Command {
    let mut cmd = Command::cargo_bin("dxfclean").expect("找不到 dxfclean 可执行文件");
    cmd.env_remove("DXFCLEAN_CONFIG").env("RUST_LOG", "warn");
    cmd
}

#[test]
fn converts_file_into_output_directory() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = dir.path().join("triangle.dxf");
    fs::write(&input, TRIANGLE).expect("写入输入失败");
    let out = dir.path().join("out");

    dxfclean()
        .arg(&input)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("10.00 × 5.00 mm"));

    let markup = fs::read_to_string(out.join("triangle.svg")).expect("读取输出失败");
    assert!(markup.contains("width=\"10mm\""));
    assert!(!markup.contains("<rect"));
}

#[test]
fn stdout_mode_emits_svg_only() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = dir.path().join("triangle.dxf");
    fs::write(&input, TRIANGLE).expect("写入输入失败");

    dxfclean()
        .arg(&input)
        .args(["--stdout", "--unit", "inches", "--cleanup", "replace", "--black"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<svg").and(predicate::str::contains("fill=\"white\"")))
        .stdout(predicate::str::contains("width=\"254mm\""))
        .stderr(predicate::str::contains("0.39 × 0.20 in"));

    assert!(!dir.path().join("triangle.svg").exists());
}

#[test]
fn failing_input_sets_exit_code() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let broken = dir.path().join("broken.dxf");
    fs::write(&broken, "not a drawing").expect("写入输入失败");

    dxfclean()
        .arg(&broken)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("broken.dxf"));
}

#[test]
fn existing_output_requires_overwrite_flag() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = dir.path().join("triangle.dxf");
    fs::write(&input, TRIANGLE).expect("写入输入失败");
    fs::write(dir.path().join("triangle.svg"), "old").expect("写入占位输出失败");

    dxfclean().arg(&input).assert().failure().code(1);
    dxfclean().arg(&input).arg("--overwrite").assert().success();
    assert_ne!(
        fs::read_to_string(dir.path().join("triangle.svg")).expect("读取输出失败"),
        "old"
    );
}

#[test]
fn rejects_invalid_arguments() {
    dxfclean().args(["a.dxf", "--unit", "furlongs"]).assert().failure();
    dxfclean()
        .args(["a.dxf", "b.dxf", "--stdout"])
        .assert()
        .failure()
        .code(1);
    dxfclean().assert().failure();
}

#[test]
fn config_file_supplies_defaults() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = dir.path().join("triangle.dxf");
    fs::write(&input, TRIANGLE).expect("写入输入失败");
    let config = dir.path().join("dxfclean.toml");
    fs::write(&config, "[conversion]\nunit = \"inches\"\ncleanup = \"replace\"\n")
        .expect("写入配置失败");

    dxfclean()
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    let markup = fs::read_to_string(dir.path().join("triangle.svg")).expect("读取输出失败");
    assert!(markup.contains("width=\"254mm\""));
    assert!(markup.contains("fill=\"white\""));
}
