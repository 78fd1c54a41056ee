pub mod cli;
pub mod errors;
pub mod loader;

use dxfclean_engine::Converter;
use errors::FrontendError;
use tracing::{error, info};

use crate::cli::{ConvertJob, print_summary, run_job};

/// 依次转换多个输入，单个失败不影响其余文件。返回失败的数量。
pub fn run_batch(converter: &Converter, jobs: &[ConvertJob]) -> usize {
    info!(files = jobs.len(), "开始批量转换");
    let mut failures = 0;
    for job in jobs {
        match run_job(converter, job) {
            Ok(summary) => print_summary(&summary),
            Err(err) => {
                report_failure(job, &err);
                failures += 1;
            }
        }
    }
    failures
}

fn report_failure(job: &ConvertJob, err: &FrontendError) {
    error!(input = %job.input.display(), error = %err, "转换失败");
    eprintln!("{}: {err}", job.input.display());
}
