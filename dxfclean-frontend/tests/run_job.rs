use std::fs;
use std::path::Path;

use dxfclean_core::units::Unit;
use dxfclean_engine::{Converter, ConverterOptions};
use dxfclean_frontend::cli::{ConvertJob, run_job};
use dxfclean_frontend::errors::FrontendError;
use dxfclean_frontend::loader::UploadedFile;
use dxfclean_frontend::run_batch;
use dxfclean_render::CleanupPolicy;

const SQUARE: &str = "  0\nSECTION\n  2\nENTITIES\n  0\nLWPOLYLINE\n  8\n0\n 90\n4\n 70\n1\n 10\n0\n 20\n0\n 10\n20\n 20\n0\n 10\n20\n 20\n20\n 10\n0\n 20\n20\n  0\nENDSEC\n  0\nEOF\n";

fn write_input(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("写入测试输入失败");
    path
}

#[test]
fn writes_svg_next_to_input() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = write_input(dir.path(), "square.dxf", SQUARE);

    let summary = run_job(&Converter::default(), &ConvertJob::new(&input, Unit::Millimeters))
        .expect("转换失败");

    let output = dir.path().join("square.svg");
    assert_eq!(summary.output.as_deref(), Some(output.as_path()));
    let markup = fs::read_to_string(&output).expect("读取输出失败");
    assert!(markup.contains("width=\"20mm\""));
    assert!(!markup.contains("<rect"));
    assert_eq!(summary.bytes_written, markup.len());

    let dims = summary.dimensions.expect("应有尺寸");
    assert!((dims.width - 20.0).abs() < 1e-9);
}

#[test]
fn refuses_to_overwrite_without_permission() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = write_input(dir.path(), "square.dxf", SQUARE);
    fs::write(dir.path().join("square.svg"), "keep me").expect("写入占位输出失败");

    let mut job = ConvertJob::new(&input, Unit::Millimeters);
    let err = run_job(&Converter::default(), &job).expect_err("应拒绝覆盖");
    assert!(matches!(err, FrontendError::OutputExists(_)));
    assert_eq!(
        fs::read_to_string(dir.path().join("square.svg")).expect("读取占位输出失败"),
        "keep me"
    );

    job.overwrite = true;
    run_job(&Converter::default(), &job).expect("允许覆盖后应成功");
    assert_ne!(
        fs::read_to_string(dir.path().join("square.svg")).expect("读取输出失败"),
        "keep me"
    );
}

#[test]
fn output_directory_is_created_and_replace_policy_applies() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = write_input(dir.path(), "Square.DXF", SQUARE);
    let converter = Converter::new(ConverterOptions {
        cleanup: CleanupPolicy::Replace,
        ..ConverterOptions::default()
    });

    let mut job = ConvertJob::new(&input, Unit::Inches);
    job.output_dir = Some(dir.path().join("nested/out"));
    let summary = run_job(&converter, &job).expect("转换失败");

    let output = dir.path().join("nested/out/Square.svg");
    assert_eq!(summary.output.as_deref(), Some(output.as_path()));
    let markup = fs::read_to_string(&output).expect("读取输出失败");
    assert!(markup.contains("fill=\"white\""));
    assert!(markup.contains("width=\"508mm\""));
}

#[test]
fn invalid_input_is_reported_and_nothing_is_written() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = write_input(dir.path(), "broken.dxf", "garbage\nmore garbage\n");

    let err = run_job(&Converter::default(), &ConvertJob::new(&input, Unit::Millimeters))
        .expect_err("应转换失败");
    assert!(matches!(err, FrontendError::Conversion(_)));
    assert!(!dir.path().join("broken.svg").exists());
}

#[test]
fn batch_continues_after_failure() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let good = write_input(dir.path(), "good.dxf", SQUARE);
    let missing = dir.path().join("missing.dxf");

    let jobs = vec![
        ConvertJob::new(&missing, Unit::Millimeters),
        ConvertJob::new(&good, Unit::Millimeters),
    ];
    assert_eq!(run_batch(&Converter::default(), &jobs), 1);
    assert!(dir.path().join("good.svg").exists());
}

#[test]
fn uploaded_file_keeps_original_name() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = write_input(dir.path(), "part 7.dxf", SQUARE);

    let upload = UploadedFile::from_path(&input).expect("读取失败");
    assert_eq!(upload.name, "part 7.dxf");
    assert_eq!(upload.len(), SQUARE.len());
    assert!(!upload.is_empty());

    let blank = UploadedFile::new("blank.dxf", Vec::new());
    assert_eq!(blank.name, "blank.dxf");
    assert!(blank.is_empty());
}

#[test]
fn empty_input_file_fails_conversion() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let input = write_input(dir.path(), "blank.dxf", "");

    let err = run_job(&Converter::default(), &ConvertJob::new(&input, Unit::Millimeters))
        .expect_err("空文件应转换失败");
    assert!(matches!(err, FrontendError::Conversion(_)));
    assert!(!dir.path().join("blank.svg").exists());
}
