use std::path::PathBuf;

use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use tracing::info;

mod api;
mod batch;
mod compose;
mod config;
mod llm;
mod metrics;
mod persona;
mod prompt;
mod state;
mod traits;
mod utils;

use batch::{run_batch, BatchArgs};
use config::Config;
use state::AppState;
use utils::logging::init_logging;

fn generate_usage() -> &'static str {
    "Usage: base_persona generate --input <wallets.json> [--limit <n>] [--out <dir>] [--style <name>] [--model-version <id>]"
}

enum Command {
    Serve,
    Generate(BatchArgs),
}

fn parse_generate_args(args: &[String]) -> anyhow::Result<BatchArgs> {
    let mut input: Option<PathBuf> = None;
    let mut limit = None;
    let mut out_dir = None;
    let mut style = None;
    let mut model_version = None;

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--input" | "-i" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --input"))?;
                input = Some(PathBuf::from(value));
            }
            "--limit" | "-n" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --limit"))?;
                limit = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| anyhow!("Invalid --limit value: {value}"))?,
                );
            }
            "--out" | "-o" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --out"))?;
                out_dir = Some(PathBuf::from(value));
            }
            "--style" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --style"))?;
                style = Some(value.clone());
            }
            "--model-version" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --model-version"))?;
                model_version = Some(value.clone());
            }
            "--help" | "-h" => {
                return Err(anyhow!(generate_usage()));
            }
            other => {
                return Err(anyhow!(
                    "Unknown generate argument: {other}\n{}",
                    generate_usage()
                ));
            }
        }
        index += 1;
    }

    let input = input.ok_or_else(|| anyhow!("--input is required\n{}", generate_usage()))?;
    let mut batch_args = BatchArgs::new(input);
    batch_args.limit = limit;
    batch_args.style = style;
    if let Some(out_dir) = out_dir {
        batch_args.out_dir = out_dir;
    }
    if let Some(model_version) = model_version {
        batch_args.model_version = model_version;
    }
    Ok(batch_args)
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    match args.get(1).map(|value| value.as_str()) {
        None | Some("serve") => Ok(Command::Serve),
        Some("generate") => Ok(Command::Generate(parse_generate_args(args)?)),
        Some(other) => Err(anyhow!(
            "Unknown command: {other}\nUsage: base_persona [serve | generate ...]"
        )),
    }
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!("Base Persona API listening on {}", bind_addr);

    axum::serve(listener, api::app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Config::load()?;
    let _guards = init_logging(&config.log_level);

    let args: Vec<String> = std::env::args().collect();
    let command = parse_command(&args)?;

    info!(
        "Starting Base Persona: image provider={}, llm provider={}, default style={}",
        config.image.default_provider, config.llm.provider, config.default_style
    );
    let state = AppState::from_config(config)?;

    match command {
        Command::Serve => serve(state).await,
        Command::Generate(batch_args) => {
            let summary = run_batch(&state, batch_args).await?;
            info!(
                "Batch summary: total={} generated={} degraded={} failed={}",
                summary.total, summary.generated, summary.degraded, summary.failed
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn no_command_means_serve() {
        assert!(matches!(parse_command(&argv(&["base_persona"])), Ok(Command::Serve)));
        assert!(matches!(parse_command(&argv(&["base_persona", "serve"])), Ok(Command::Serve)));
        assert!(parse_command(&argv(&["base_persona", "mint"])).is_err());
    }

    #[test]
    fn generate_flags_parse() {
        let command = parse_command(&argv(&[
            "base_persona",
            "generate",
            "--input",
            "wallets.json",
            "--limit",
            "5",
            "--out",
            "renders",
            "--style",
            "minimal-lite",
        ]))
        .unwrap();
        let Command::Generate(args) = command else {
            panic!("expected generate");
        };
        assert_eq!(args.input, PathBuf::from("wallets.json"));
        assert_eq!(args.limit, Some(5));
        assert_eq!(args.out_dir, PathBuf::from("renders"));
        assert_eq!(args.style.as_deref(), Some("minimal-lite"));
        assert_eq!(args.model_version, "persona_v1");
    }

    #[test]
    fn generate_requires_input_and_valid_limit() {
        assert!(parse_command(&argv(&["base_persona", "generate"])).is_err());
        assert!(parse_command(&argv(&["base_persona", "generate", "--input", "w.json", "--limit", "x"])).is_err());
        assert!(parse_command(&argv(&["base_persona", "generate", "--bogus"])).is_err());
    }
}
