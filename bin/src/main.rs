use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use loadgen_core::{Mode, Report, UploadSource, config::trace};
use tracing::{debug, error, info};

mod cli;
mod payload_file;

use cli::{Cli, Plan};
use payload_file::PayloadFile;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main]
async fn main() {
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let cli = Cli::parse();
    let output_json = cli.json;
    let log_format = cli
        .log_format
        .parse::<trace::LogFormat>()
        .and_then(|format| trace::init(&cli.loadgen_log, format).map(|_| format));
    let log_format = match log_format {
        Ok(format) => format,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }
    debug!(?cli, ?log_format);

    let plan = match Plan::try_from(cli) {
        Ok(plan) => plan,
        Err(err) => {
            error!("configuration error: {err:#}");
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };

    match run(plan).await {
        Ok(report) => {
            if output_json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        eprintln!("failed to serialize report: {err:#}");
                        std::process::exit(1);
                    }
                }
            } else {
                println!("{}", report.human_summary());
            }
        }
        Err(err) => {
            error!("run failed: {err:#}");
            eprintln!("run failed: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run(plan: Plan) -> Result<Report> {
    // kept alive until the run finishes, removes the file when dropped
    let payload_file = if plan.job().mode == Mode::ClientStream {
        let size = plan.job().payload_size_bytes;
        Some(
            PayloadFile::create(size)
                .await
                .with_context(|| format!("create {size} byte payload file"))?,
        )
    } else {
        None
    };
    let upload = payload_file
        .as_ref()
        .map(|file| Arc::new(file.path().to_path_buf()) as Arc<dyn UploadSource>);

    let report = match plan {
        Plan::Http { mut target, job } => {
            info!(destination = %target.destination, method = %target.method, "loading http endpoint");
            target.upload = upload;
            loadgen_core::run_http(target, &job).await?
        }
        Plan::Grpc { mut target, job } => {
            info!(destination = %target.destination, method = %target.method.full_path(), "loading grpc method");
            target.upload = upload;
            loadgen_core::run_rpc(target, &job).await?
        }
    };
    drop(payload_file);
    Ok(report)
}
