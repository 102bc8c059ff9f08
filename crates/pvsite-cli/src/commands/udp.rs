//! Udp command implementation

use crate::cli::UdpArgs;
use crate::dry_run::{display_planned_actions, ActionType, PlannedAction};
use crate::output::OutputWriter;
use crate::output_types::UdpOutput;
use crate::pipeline::connect;
use anyhow::{Context, Result};
use pvsite_core::config::{CliConfigOverrides, LayeredConfig};
use pvsite_openeo::inference::{DEFAULT_UDF, INFERENCE_PROCESS_ID};
use pvsite_openeo::{build_inference_udp, store_udp, InferenceOptions, WeekWindow};
use std::fs;

pub async fn execute(args: UdpArgs, mut config: LayeredConfig, output: &OutputWriter, dry_run: bool) -> Result<()> {
    config.update_from_cli(CliConfigOverrides { udf: args.udf.clone(), ..Default::default() });

    let udf = match &config.udf.value {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read UDF {}", path))?,
        None => DEFAULT_UDF.to_string(),
    };

    let options = InferenceOptions {
        udf,
        inference_url: config.inference_url.value.clone(),
        week_window: (args.weeks > 0).then_some(WeekWindow { first: args.first_week, count: args.weeks }),
        ..InferenceOptions::default()
    };

    if dry_run {
        let mut actions = vec![PlannedAction::new(
            ActionType::WriteFile,
            format!("Save {} to {}", INFERENCE_PROCESS_ID, args.output.display()),
        )
        .with_detail(format!("UDF: {}", config.udf.value.as_deref().unwrap_or("bundled ONNX classifier")))];
        if !args.no_remote {
            actions.push(
                PlannedAction::new(ActionType::StoreProcess, format!("Store {}", INFERENCE_PROCESS_ID))
                    .with_detail(format!("Backend: {}", config.backend_url.value)),
            );
        }
        return display_planned_actions(output, &actions);
    }

    let udp = build_inference_udp(&options);
    udp.process_graph.validate()?;
    udp.save(&args.output)?;
    output.success(format!("Saved {} to {}", udp.id, args.output.display()));

    if !args.no_remote {
        let client = connect(&config).await?;
        store_udp(&client, &udp).await.context("Failed to store the process")?;
        output.success(format!("Stored {} on {}", udp.id, client.base_url()));
    }

    output.result(UdpOutput {
        process_id: udp.id.clone(),
        saved_to: args.output.display().to_string(),
        stored_remotely: !args.no_remote,
        parameters: udp.parameters.iter().map(|p| p.name.clone()).collect(),
        nodes: udp.process_graph.len(),
    })
}
