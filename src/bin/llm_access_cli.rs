//! llm-access CLI：单次分析调用与配置检查的命令行工具
//!
//! Usage:
//!   llm-access-cli analyze <prompt> [--type T] [--json] [--strict] [--model M] [--stream]
//!   llm-access-cli config [--config <file>]
//!   llm-access-cli help

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context};
use llm_access::{
    AccessConfig, AccessService, BackendKind, OutputFormat, RequestOptions, StreamingEvent,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "analyze" => cmd_analyze(&args[2..]).await,
        "config" => cmd_config(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("llm-access-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"llm-access-cli: LLM 访问层命令行工具

USAGE:
    llm-access-cli <COMMAND> [OPTIONS]

COMMANDS:
    analyze <prompt>            Run one analysis and print the result as JSON
        --type <T>              Analysis type (default: general)
        --json                  Request JSON output
        --strict                Enforce valid JSON (implies --json)
        --model <M>             Pin a model, bypassing tier selection
        --backend <B>           Pin a backend (openai, anthropic, qwen)
        --stream                Print chunks to stderr as they arrive
        --mock                  Use the offline mock provider
        --config <file>         Load configuration from YAML instead of the environment
    config [--config <file>]    Print the effective configuration (API keys redacted)
    version                     Show version information
    help                        Show this help message

ENVIRONMENT:
    LLM_BACKEND                 openai | anthropic | qwen
    LLM_MOCK_MODE               Serve every call from the mock provider
    OPENAI_API_KEY, ANTHROPIC_API_KEY, DASHSCOPE_API_KEY
    RUST_LOG                    Log filter (default: info)"#
    );
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn load_config(args: &[String]) -> anyhow::Result<AccessConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => AccessConfig::from_yaml_file(path)
            .with_context(|| format!("cannot load configuration from {path}"))?,
        None => AccessConfig::from_env().context("invalid environment configuration")?,
    };
    if has_flag(args, "--mock") {
        config.mock_mode = true;
    }
    Ok(config)
}

/// First argument that is neither a flag nor a flag's value.
fn positional(args: &[String]) -> Option<&str> {
    const VALUED: [&str; 4] = ["--type", "--model", "--backend", "--config"];
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if VALUED.contains(&arg.as_str()) {
            skip = true;
            continue;
        }
        if !arg.starts_with("--") {
            return Some(arg);
        }
    }
    None
}

async fn cmd_analyze(args: &[String]) -> anyhow::Result<()> {
    let Some(prompt) = positional(args) else {
        bail!("analyze needs a prompt");
    };
    let analysis_type = flag_value(args, "--type").unwrap_or("general");

    let strict = has_flag(args, "--strict");
    let mut options = RequestOptions::new().with_strict_format(strict);
    if strict || has_flag(args, "--json") {
        options = options.with_format(OutputFormat::Json);
    }
    if let Some(model) = flag_value(args, "--model") {
        options = options.with_model(model);
    }
    if let Some(backend) = flag_value(args, "--backend") {
        options = options.with_backend(backend.parse::<BackendKind>()?);
    }

    let service = AccessService::from_config(load_config(args)?)?;

    let result = if has_flag(args, "--stream") {
        let on_event = Arc::new(|event: StreamingEvent| {
            if let Some(delta) = event.delta() {
                let mut err = std::io::stderr();
                let _ = err.write_all(delta.as_bytes());
                let _ = err.flush();
            } else {
                eprintln!();
            }
        });
        service
            .analyze_streaming(prompt, analysis_type, options, on_event)
            .await
    } else {
        service.analyze(prompt, analysis_type, options).await
    };
    service.close().await;

    match result {
        Ok(analysis) => {
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_value())?);
            std::process::exit(2);
        }
    }
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    let mut config = load_config(args)?;
    for vendor in [
        &mut config.vendors.openai,
        &mut config.vendors.anthropic,
        &mut config.vendors.qwen,
    ] {
        if vendor.has_api_key() {
            vendor.api_key = Some("***".into());
        }
    }
    println!("{}", serde_yaml::to_string(&config)?);
    match config.validate() {
        Ok(()) => println!("# configuration is valid"),
        Err(e) => println!("# configuration problem: {e}"),
    }
    Ok(())
}
