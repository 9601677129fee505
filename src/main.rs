use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use underwrite::config::EngineConfig;
use underwrite::engine::Engine;
use underwrite::logging;
use underwrite::rating::{RatingInputs, RatingResult};
use underwrite::snapshot::InMemorySnapshotStore;
use underwrite::types::format_cents;

/// One NDJSON line per input, in input order.
#[derive(Serialize)]
struct RatedLine<'a> {
    index: usize,
    industry_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a RatingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<String> = None;
    let mut inputs_path: Option<String> = None;
    let mut output_path: Option<String> = None;
    let mut table_version: Option<String> = None;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).context("--config requires a path")?.clone());
            }
            "--inputs" => {
                i += 1;
                inputs_path = Some(args.get(i).context("--inputs requires a path")?.clone());
            }
            "--output" => {
                i += 1;
                output_path = Some(args.get(i).context("--output requires a path")?.clone());
            }
            "--rate-table-version" => {
                i += 1;
                table_version = Some(args.get(i).context("--rate-table-version requires a version id")?.clone());
            }
            "--quiet" => quiet = true,
            other => bail!("unknown argument {other:?}"),
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => EngineConfig::from_path(path).with_context(|| format!("loading engine config from {path}"))?,
        None => EngineConfig::canonical(),
    };
    let engine = Engine::new(config, Arc::new(InMemorySnapshotStore::new())).context("building engine")?;

    let inputs_path = inputs_path.context("--inputs <path> is required")?;
    let text = std::fs::read_to_string(&inputs_path).with_context(|| format!("reading {inputs_path}"))?;
    let inputs: Vec<RatingInputs> =
        serde_json::from_str(&text).with_context(|| format!("parsing rating inputs from {inputs_path}"))?;

    let results = match &table_version {
        Some(version) => inputs.iter().map(|input| engine.calculate_premium_with_version(input, version)).collect(),
        None => engine.calculate_premium_batch(&inputs),
    };

    let mut writer: BufWriter<Box<dyn Write>> = match &output_path {
        Some(path) => BufWriter::new(Box::new(File::create(path).with_context(|| format!("creating {path}"))?)),
        None => BufWriter::new(Box::new(io::stdout().lock())),
    };

    let mut failed = 0usize;
    let mut total_premium = 0u64;
    for (index, (input, result)) in inputs.iter().zip(&results).enumerate() {
        let line = match result {
            Ok(rated) => {
                total_premium += rated.risk_adjusted_premium;
                RatedLine { index, industry_code: &input.industry_code, result: Some(rated), error: None }
            }
            Err(err) => {
                failed += 1;
                RatedLine { index, industry_code: &input.industry_code, result: None, error: Some(err.to_string()) }
            }
        };
        serde_json::to_writer(&mut writer, &line).context("serializing rating result")?;
        writeln!(writer).context("writing newline")?;
    }
    writer.flush().context("flushing output")?;

    if !quiet {
        eprintln!(
            "Rated {} input(s) against {}: {} failed, total risk-adjusted premium {}",
            inputs.len(),
            table_version.unwrap_or_else(|| engine.active_rate_tables().version().to_string()),
            failed,
            format_cents(total_premium),
        );
    }
    Ok(())
}
