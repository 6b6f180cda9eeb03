//! flightlens main binary.
//!
//! Natural-language analytics over the Power BI flight dataset.

mod agent;
mod config;
mod doctor;
mod insights;
mod routes;
mod runtime;
mod server;
mod session;

use clap::{Parser, Subcommand};
use fl_powerbi::FilterContext;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "flightlens", version, about = "Ask questions about flight data in Power BI")]
struct Cli {
    /// Config file (default: ~/.flightlens/config.toml).
    #[arg(long, global = true, env = "FLIGHTLENS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API (default).
    Serve,
    /// Answer one question and print the answer.
    Ask {
        question: String,
        /// Filter context as JSON, e.g. '{"MONTH": {"table": "flights", "values": [7]}}'.
        #[arg(long)]
        filters: Option<String>,
        /// Print the full error chain on failure.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the fast-metrics statistics for a filter context.
    Stats {
        #[arg(long)]
        filters: Option<String>,
    },
    /// Print the discovered dataset schema.
    Schema,
    /// Report configuration and probe Azure AD, Power BI and the LLM.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();

    let command = if let Some(command) = cli.command {
        command
    } else {
        Command::Serve
    };

    match command {
        Command::Serve => server::serve(cli.config).await,
        Command::Ask {
            question,
            filters,
            verbose,
        } => {
            let filters = filters.as_deref().map(parse_filters).transpose()?;
            let state = build_state(cli.config, true).await?;
            match state.ask(None, &question, filters, verbose).await {
                Ok(answer) => {
                    println!("{answer}");
                    Ok(())
                }
                Err(failure) => {
                    eprintln!("{}", failure.message);
                    if let Some(detail) = failure.detail {
                        eprintln!("{detail}");
                    }
                    Err(anyhow::anyhow!("question could not be answered"))
                }
            }
        }
        Command::Stats { filters } => {
            let filters = filters.as_deref().map(parse_filters).transpose()?.unwrap_or_default();
            let state = build_state(cli.config, false).await?;
            let stats = state.runtime.metrics.compute_filtered_stats(&filters).await;
            println!("Filters: {}", filters.describe());
            for line in stats.summary_lines() {
                println!("{line}");
            }
            if !stats.failed_metrics.is_empty() {
                eprintln!("failed metrics: {}", stats.failed_metrics.join(", "));
            }
            Ok(())
        }
        Command::Schema => {
            let state = build_state(cli.config, false).await?;
            let schema = state.runtime.schema.get_schema().await;
            println!("{}", schema.render());
            Ok(())
        }
        Command::Doctor => doctor::run(cli.config).await,
    }
}

/// `require_llm` also demands the LLM group; data-only commands skip it.
async fn build_state(
    config_path: Option<PathBuf>,
    require_llm: bool,
) -> anyhow::Result<server::AppState> {
    let cfg = config::FlightLensConfig::load(config_path).await?;
    if require_llm {
        cfg.require_complete()?;
    } else {
        let data_groups: Vec<String> = cfg
            .missing_groups()
            .into_iter()
            .filter(|g| g.group != "LLM deployment")
            .map(|g| g.to_string())
            .collect();
        if !data_groups.is_empty() {
            return Err(anyhow::anyhow!(
                "missing configuration: {}",
                data_groups.join("; ")
            ));
        }
    }
    let runtime = runtime::Runtime::build(&cfg)?;
    Ok(server::AppState::new(cfg, runtime))
}

fn parse_filters(raw: &str) -> anyhow::Result<FilterContext> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("--filters is not a valid filter context: {e}"))
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,flightlens=debug,fl_app=debug,fl_powerbi=debug,fl_llm=debug,tower_http=info",
        ),
    };
    let log_format = std::env::var("FLIGHTLENS_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported FLIGHTLENS_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::info!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve_and_parses_ask_flags() {
        let cli = Cli::try_parse_from(["flightlens"]).expect("parse");
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from([
            "flightlens",
            "ask",
            "Which airline is most delayed?",
            "--filters",
            r#"{"MONTH": {"table": "flights", "values": [7]}}"#,
            "--verbose",
        ])
        .expect("parse");
        match cli.command {
            Some(Command::Ask {
                question,
                filters,
                verbose,
            }) => {
                assert_eq!(question, "Which airline is most delayed?");
                assert!(verbose);
                let filters = parse_filters(&filters.expect("filters")).expect("valid");
                assert_eq!(filters.describe(), "MONTH: 7");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn malformed_filters_are_a_readable_error() {
        let err = parse_filters("{not json").expect_err("invalid");
        assert!(err.to_string().contains("--filters"));
    }

    #[test]
    fn panic_payloads_render_as_text() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_to_string(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_payload_to_string(payload.as_ref()), "non-string panic payload");
    }
}
