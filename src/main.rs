use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sensor_fleet::{Config, DeviceOutcome, EvaluationResult, FleetCoordinator};

#[derive(Serialize)]
struct ImageSummary {
    width: u32,
    height: u32,
    bytes: usize,
    file: Option<PathBuf>,
}

#[derive(Serialize)]
struct DeviceSummary<'a> {
    device: &'a str,
    result: Option<&'a EvaluationResult>,
    /// Offset of the detection from the image centre
    offset: Option<(f64, f64)>,
    attempts: Option<u32>,
    image: Option<ImageSummary>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        bail!("usage: sensor_fleet <config.json>");
    };
    let config = Config::load(Path::new(path))?;

    let mut fleet = FleetCoordinator::new();
    if let Some(deadline) = config.run_timeout() {
        fleet = fleet.with_deadline(deadline);
    }
    let token = fleet.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping devices");
            token.cancel();
        }
    });

    let outcomes = fleet.connect_and_run(config.targets()).await;

    if let Some(dir) = &config.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }
    let summaries = outcomes
        .iter()
        .map(|outcome| summarize(outcome, config.output_dir.as_deref()))
        .collect::<Result<Vec<_>>>()?;
    println!("{}", serde_json::to_string_pretty(&summaries)?);

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    info!(devices = outcomes.len(), failed, "run finished");
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn summarize<'a>(outcome: &'a DeviceOutcome, output_dir: Option<&Path>) -> Result<DeviceSummary<'a>> {
    let evaluation = match &outcome.result {
        Ok(evaluation) => evaluation,
        Err(e) => {
            return Ok(DeviceSummary {
                device: &outcome.device,
                result: None,
                offset: None,
                attempts: None,
                image: None,
                error: Some(e.to_string()),
            });
        }
    };

    let image = match &evaluation.image {
        Some(chunk) => {
            let file = match output_dir {
                Some(dir) => {
                    let file = dir.join(format!("{}.img", file_stem(&outcome.device)));
                    std::fs::write(&file, &chunk.data)
                        .with_context(|| format!("writing {}", file.display()))?;
                    Some(file)
                }
                None => None,
            };
            Some(ImageSummary {
                width: chunk.header.image_width,
                height: chunk.header.image_height,
                bytes: chunk.data.len(),
                file,
            })
        }
        None => None,
    };

    Ok(DeviceSummary {
        device: &outcome.device,
        result: Some(&evaluation.result),
        offset: image
            .as_ref()
            .and_then(|i| evaluation.result.offset_from_center(i.width, i.height)),
        attempts: Some(evaluation.attempts),
        image,
        error: None,
    })
}

/// Device names usually are `host:port`; keep them filesystem friendly.
fn file_stem(device: &str) -> String {
    device
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
