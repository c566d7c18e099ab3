mod backend;
mod batcher;
mod checkpoint;
mod cli;
mod config;
mod dispatcher;
mod error;
mod orchestrator;
mod outcome;
mod pacing;
mod state_machine;
mod ui;
mod workload;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use backend::{Provider, ProviderKind};
use checkpoint::CheckpointTable;
use cli::{Cli, Command};
use config::HarnessConfig;
use dispatcher::{DispatchConfig, Dispatcher};
use orchestrator::{RunOrchestrator, RunSettings};
use pacing::Pacing;
use ui::RunUi;
use workload::{DEFAULT_DISTRACTOR_PROMPT, JudgeTemplate, Workload, load_distractors};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = execute(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = HarnessConfig::load().context("failed to load niah.toml")?;
    if let Some(timeout) = cli.timeout_secs {
        config.per_item_timeout_secs = timeout;
    }
    if let Some(pacing) = cli.pacing_secs {
        config.pacing_interval_secs = pacing;
    }

    match cli.command {
        Command::Run {
            provider,
            input,
            output,
            input_column,
            output_column,
            model,
            max_context_length,
            max_tokens_per_minute,
            force,
        } => {
            let workload = Workload::from_csv(
                &input,
                &input_column,
                max_context_length,
                config.default_max_output_tokens,
            )?;
            let cap = cli.max_workers.unwrap_or(config.concurrency_cap);
            let settings = RunSettings {
                result_column: output_column,
                max_weight_per_batch: max_tokens_per_minute,
                max_context_weight: Some(max_context_length),
                force,
            };
            run_workload(&config, provider.into(), model, cap, &workload, &output, &settings).await
        }
        Command::Judge {
            input,
            output,
            prompt_file,
            output_column,
            question_column,
            answer_column,
            result_column,
            model,
            provider,
            max_tokens_per_minute,
            force,
        } => {
            let mut template = JudgeTemplate {
                output_column,
                question_column,
                answer_column,
                ..JudgeTemplate::default()
            };
            if let Some(path) = prompt_file {
                template.prompt = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read prompt file {}", path.display()))?;
            }
            let workload = Workload::for_judge(&input, &template)?;
            let cap = cli.max_workers.unwrap_or(config.judge_concurrency_cap);
            let settings = RunSettings {
                result_column,
                max_weight_per_batch: max_tokens_per_minute,
                max_context_weight: None,
                force,
            };
            run_workload(&config, provider.into(), model, cap, &workload, &output, &settings).await
        }
        Command::Distractors {
            input,
            output,
            prompt_file,
            distractors_file,
            output_column,
            question_column,
            answer_column,
            verdict_column,
            result_column,
            model,
            provider,
            max_context_length,
            max_tokens_per_minute,
            force,
        } => {
            let mut template = JudgeTemplate {
                prompt: DEFAULT_DISTRACTOR_PROMPT.to_string(),
                output_column,
                question_column,
                answer_column,
                ..JudgeTemplate::default()
            };
            if let Some(path) = prompt_file {
                template.prompt = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read prompt file {}", path.display()))?;
            }
            if let Some(path) = distractors_file {
                template.distractors = load_distractors(&path)
                    .with_context(|| format!("failed to read distractors {}", path.display()))?;
            }
            let workload =
                Workload::for_distractors(&input, &template, &verdict_column, max_context_length)?;
            let cap = cli.max_workers.unwrap_or(config.judge_concurrency_cap);
            let settings = RunSettings {
                result_column,
                max_weight_per_batch: max_tokens_per_minute,
                max_context_weight: Some(max_context_length),
                force,
            };
            run_workload(&config, provider.into(), model, cap, &workload, &output, &settings).await
        }
        Command::Status {
            output,
            output_column,
        } => {
            let table = CheckpointTable::open(&output, &output_column)
                .with_context(|| format!("failed to open checkpoint {}", output.display()))?;
            RunUi::new().status(&table, &output);
            Ok(())
        }
    }
}

async fn run_workload(
    config: &HarnessConfig,
    kind: ProviderKind,
    model: String,
    concurrency_cap: usize,
    workload: &Workload,
    output: &Path,
    settings: &RunSettings,
) -> Result<()> {
    let provider = Provider::from_config(kind, config)?;
    info!(provider = %kind, %model, concurrency_cap, "starting run");

    let dispatcher = Dispatcher::new(
        Arc::new(provider),
        DispatchConfig {
            model,
            concurrency_cap,
            per_item_timeout: config.per_item_timeout(),
        },
    );
    let pacing = Pacing::new(config.pacing_interval());
    let orchestrator = RunOrchestrator::new(dispatcher, pacing, RunUi::new());

    let record = orchestrator.run(workload, output, settings).await?;
    info!(run_id = %record.run_id, duration_ms = record.duration_ms, "run finished");
    orchestrator.ui().print_record(&record);
    Ok(())
}
