//! Infer command implementation

use crate::cli::InferArgs;
use crate::dry_run::{display_planned_actions, ActionType, PlannedAction};
use crate::output::OutputWriter;
use crate::output_types::InferOutput;
use crate::pipeline::connect;
use crate::progress::{create_spinner, finish_error, finish_success};
use anyhow::{bail, Result};
use chrono::Utc;
use pvsite_core::config::LayeredConfig;
use pvsite_openeo::{execute_udp_batch, BatchRun};
use serde_json::json;
use std::time::Duration;

pub async fn execute(args: InferArgs, config: LayeredConfig, output: &OutputWriter, dry_run: bool) -> Result<()> {
    if args.west >= args.east || args.south >= args.north {
        bail!(
            "Invalid extent: west {} / east {}, south {} / north {}",
            args.west,
            args.east,
            args.south,
            args.north
        );
    }

    let mut run = BatchRun::inference(args.west, args.south, args.east, args.north, args.year)
        .with_argument("inference_url", json!(config.inference_url.value))
        .with_dependencies_url(config.dependencies_url.value.clone())
        .with_poll_interval(Duration::from_secs(config.poll_interval_secs.value));
    run.title = args.title.clone();

    if dry_run {
        let action = PlannedAction::new(
            ActionType::SubmitJob,
            format!("Run {} as batch job '{}'", run.process_id, run.title),
        )
        .with_detail(format!("Backend: {}", config.backend_url.value))
        .with_detail(format!(
            "Extent: {}, {}, {}, {} ({})",
            args.west, args.south, args.east, args.north, args.year
        ))
        .with_detail(format!("Output: {}", args.output.display()));
        return display_planned_actions(output, &[action]);
    }

    let client = connect(&config).await?;
    let started_at = Utc::now();
    let spinner = create_spinner("Submitting batch job", output.is_json());

    let mut statuses = Vec::new();
    let result = execute_udp_batch(&client, &run, &args.output, |status| {
        spinner.set_message(format!("Job {}", status));
        statuses.push(status.to_string());
    })
    .await;

    let outputs = match result {
        Ok(outputs) => {
            finish_success(&spinner, &format!("Job finished, {} file(s) saved", outputs.len()));
            outputs
        }
        Err(e) => {
            finish_error(&spinner, "Job failed");
            return Err(e.into());
        }
    };

    for path in &outputs {
        output.success(format!("Saved {}", path.display()));
    }

    output.result(InferOutput {
        title: run.title,
        started_at,
        finished_at: Utc::now(),
        statuses,
        outputs: outputs.iter().map(|p| p.display().to_string()).collect(),
    })
}
