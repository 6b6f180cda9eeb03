//! `flightlens doctor`: configuration report plus live connectivity probes.

use crate::config::FlightLensConfig;
use crate::runtime::Runtime;
use anyhow::Result;
use fl_llm::ChatMessage;
use std::path::PathBuf;
use std::time::Instant;

const PROBE_QUERY: &str = "EVALUATE ROW(\"Test\", 1)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Pass => "ok",
            Self::Warn => "warn",
            Self::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl Check {
    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

/// Keeps the first four characters of a secret.
pub fn mask(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return "(missing)".to_string();
    }
    let shown: String = value.chars().take(4).collect();
    format!("{shown}***")
}

pub fn config_checks(cfg: &FlightLensConfig) -> Vec<Check> {
    let entries: [(&str, &str, bool); 11] = [
        ("AAD_TENANT_ID", &cfg.azure_ad.tenant_id, false),
        ("AAD_CLIENT_ID", &cfg.azure_ad.client_id, false),
        ("AAD_CLIENT_SECRET", &cfg.azure_ad.client_secret, true),
        ("POWERBI_WORKSPACE_ID", &cfg.powerbi.workspace_id, false),
        ("POWERBI_DATASET_ID", &cfg.powerbi.dataset_id, false),
        ("POWERBI_REPORT_ID", &cfg.powerbi.report_id, false),
        ("AZURE_OPENAI_ENDPOINT", &cfg.llm.endpoint, false),
        ("AZURE_OPENAI_API_KEY", &cfg.llm.api_key, true),
        ("AZURE_OPENAI_API_VERSION", &cfg.llm.api_version, false),
        ("AZURE_OPENAI_DEPLOYMENT_NAME", &cfg.llm.deployment, false),
        ("OPENAI_API_KEY", &cfg.llm.openai_api_key, true),
    ];
    let optional_llm = cfg.llm.backend().is_some();
    entries
        .into_iter()
        .map(|(name, value, secret)| {
            let value = value.trim();
            if value.is_empty() {
                let status = if name.starts_with("AZURE_OPENAI") || name == "OPENAI_API_KEY" {
                    if optional_llm { CheckStatus::Warn } else { CheckStatus::Fail }
                } else {
                    CheckStatus::Fail
                };
                Check::new(name, status, "missing")
            } else if secret {
                Check::new(name, CheckStatus::Pass, mask(value))
            } else {
                Check::new(name, CheckStatus::Pass, value)
            }
        })
        .collect()
}

pub fn docs_check(path: Option<PathBuf>) -> Check {
    match path {
        Some(path) => Check::new("dax documentation", CheckStatus::Pass, path.display().to_string()),
        None => Check::new(
            "dax documentation",
            CheckStatus::Warn,
            "dax_documentation.txt not found; dax_syntax will report it missing",
        ),
    }
}

async fn live_checks(cfg: &FlightLensConfig, runtime: &Runtime) -> Vec<Check> {
    let mut out = Vec::new();

    let started = Instant::now();
    match runtime.tokens.get_access_token().await {
        Ok(_) => out.push(Check::new(
            "power bi token",
            CheckStatus::Pass,
            format!("acquired in {} ms", started.elapsed().as_millis()),
        )),
        Err(e) => {
            out.push(Check::new("power bi token", CheckStatus::Fail, e.to_string()));
            out.push(Check::new("dax probe", CheckStatus::Fail, "skipped: no token"));
            return out;
        }
    }

    let started = Instant::now();
    match runtime.executor.execute_query(PROBE_QUERY).await {
        Ok(response) => out.push(Check::new(
            "dax probe",
            CheckStatus::Pass,
            format!(
                "dataset {} answered {:?} in {} ms",
                cfg.powerbi.dataset_id.trim(),
                response.scalar(),
                started.elapsed().as_millis()
            ),
        )),
        Err(e) => out.push(Check::new("dax probe", CheckStatus::Fail, e.to_string())),
    }

    match runtime.llm.as_ref() {
        Some(llm) => {
            let started = Instant::now();
            let ping = [ChatMessage::user("Reply with the single word: pong")];
            match llm.chat(&ping, &[]).await {
                Ok(response) => out.push(Check::new(
                    "llm ping",
                    CheckStatus::Pass,
                    format!(
                        "{} replied {:?} in {} ms",
                        llm.model(),
                        response.message.content.trim(),
                        started.elapsed().as_millis()
                    ),
                )),
                Err(e) => out.push(Check::new("llm ping", CheckStatus::Fail, e.to_string())),
            }
        }
        None => out.push(Check::new("llm ping", CheckStatus::Fail, "no llm deployment configured")),
    }
    out
}

/// Runs every check and prints one line per check. Fails when any check failed.
pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = FlightLensConfig::load_with_path(config_path).await?;
    println!("flightlens doctor (config: {})", path.display());

    let runtime = Runtime::build(&cfg)?;
    let mut checks = config_checks(&cfg);
    checks.push(docs_check(runtime.docs.resolved_path()));
    checks.extend(live_checks(&cfg, &runtime).await);

    for check in &checks {
        println!("[{:>4}] {:<28} {}", check.status.label(), check.name, check.detail);
    }
    let failed = checks.iter().filter(|c| c.status == CheckStatus::Fail).count();
    tracing::info!(checks = checks.len(), failed, "doctor completed");
    if failed > 0 {
        return Err(anyhow::anyhow!("{failed} check(s) failed"));
    }
    Ok(())
}
