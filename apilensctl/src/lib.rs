use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use apilens_core::capture::{
    capture_channel, run_capture, CaptureOptions, CaptureOutcome, ErrorReport, FailureDetails,
    NetworkEvent,
};
use apilens_core::{
    load_apilens_config, parse_rate_limit_headers, ApiLens, ApiRecord, CaptureReport,
    RateLimitInfo,
};

/// Replays have no live page to wait on; the window only guards against a
/// hung consumer.
const REPLAY_WINDOW: Duration = Duration::from_secs(60);

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] apilens_core::ConfigError),
    #[error("capture error: {0}")]
    Capture(#[from] apilens_core::CaptureError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed")]
    Authentication,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "ApiLens command-line control interface", long_about = None)]
pub struct Cli {
    /// Caminho do apilens.toml principal
    #[arg(long, default_value = "configs/apilens.toml")]
    pub config: PathBuf,
    /// Token para autenticação local (se APILENSCTL_TOKEN estiver definido)
    #[arg(long)]
    pub token: Option<String>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Habilita logs de depuração no stderr
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Captura o tráfego de API de uma página ao vivo
    Capture(CaptureArgs),
    /// Reprocessa um log NDJSON de eventos de rede
    Replay(ReplayArgs),
    /// Diagnostica uma mensagem de falha de navegação
    Diagnose(DiagnoseArgs),
    /// Interpreta headers de rate limit de uma resposta
    Ratelimit(RatelimitArgs),
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// URL da página a visitar
    pub url: String,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Arquivo NDJSON com um evento de rede por linha
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct DiagnoseArgs {
    /// Mensagem de erro reportada pelo navegador
    pub message: String,
    /// Código associado (ex.: ERR_NAME_NOT_RESOLVED)
    #[arg(long)]
    pub code: Option<String>,
    /// Status HTTP associado, se houver
    #[arg(long)]
    pub status: Option<u16>,
}

#[derive(Args, Debug)]
pub struct RatelimitArgs {
    /// Arquivo JSON com o mapa de headers da resposta
    pub file: PathBuf,
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;
    init_tracing(cli.debug);

    match &cli.command {
        Commands::Capture(args) => {
            let config = load_apilens_config(&cli.config)?;
            let report = capture_live(&config, args)?;
            render(&report, cli.format)?;
        }
        Commands::Replay(args) => {
            let summary = replay_log(args)?;
            render(&summary, cli.format)?;
        }
        Commands::Diagnose(args) => {
            let report = diagnose_failure(args);
            render(&report, cli.format)?;
        }
        Commands::Ratelimit(args) => {
            let verdict = inspect_rate_limit(args)?;
            render(&verdict, cli.format)?;
        }
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("APILENSCTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn init_tracing(debug: bool) {
    if !debug {
        return;
    }
    tracing_subscriber::fmt()
        .with_env_filter("apilens_core=debug,apilensctl=debug")
        .with_writer(std::io::stderr)
        .init();
}

fn capture_live(config: &apilens_core::ApiLensConfig, args: &CaptureArgs) -> Result<CaptureReport> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let lens = ApiLens::with_chrome(config);
        let result = lens.capture(&args.url).await;
        lens.shutdown().await;
        Ok(result?)
    })
}

fn replay_log(args: &ReplayArgs) -> Result<ReplaySummary> {
    let content = fs::read_to_string(&args.file)?;
    let mut events = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: NetworkEvent = serde_json::from_str(line).map_err(|err| {
            AppError::InvalidInput(format!("linha {}: {err}", index + 1))
        })?;
        events.push(event);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(async {
        let (feed, receiver) = capture_channel(events.len().max(1));
        for event in events {
            feed.push(event);
        }
        drop(feed);
        run_capture(receiver, CaptureOptions::new(REPLAY_WINDOW)).await
    });

    Ok(ReplaySummary {
        file: args.file.display().to_string(),
        outcome,
    })
}

fn diagnose_failure(args: &DiagnoseArgs) -> ErrorReport {
    let mut details = FailureDetails::from_message(&args.message);
    if let Some(code) = &args.code {
        details = details.with_code(code);
    }
    if let Some(status) = args.status {
        details = details.with_status(status);
    }
    ErrorReport::from_details(details)
}

fn inspect_rate_limit(args: &RatelimitArgs) -> Result<RateLimitVerdict> {
    let content = fs::read_to_string(&args.file)?;
    let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&content)?;
    let headers: HashMap<String, String> = raw
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect();
    Ok(RateLimitVerdict {
        info: parse_rate_limit_headers(&headers),
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

fn record_line(record: &ApiRecord) -> String {
    let mut line = format!(
        "#{} {} {} [{}]",
        record.id,
        record.method,
        record.url,
        record.resource_kind.as_str()
    );
    match &record.response {
        Some(response) => {
            line.push_str(&format!(" | status={}", response.status));
            if let Some(rate) = &response.rate_limit {
                if let Some(percentage) = rate.percentage {
                    line.push_str(&format!(" | rate={percentage}%"));
                }
            }
        }
        None => line.push_str(" | pendente"),
    }
    if let Some(auth) = &record.authentication {
        line.push_str(&format!(" | auth={}", auth.scheme.as_str()));
    }
    if let Some(graphql) = &record.graphql {
        line.push_str(&format!(" | graphql={}", graphql.operation.as_str()));
        if let Some(name) = &graphql.name {
            line.push_str(&format!(" {name}"));
        }
    }
    line
}

fn outcome_lines(outcome: &CaptureOutcome) -> Vec<String> {
    let mut lines = Vec::new();
    if outcome.records.is_empty() {
        lines.push("Nenhuma chamada de API observada".to_string());
    }
    for record in &outcome.records {
        lines.push(record_line(record));
    }
    if outcome.pending > 0 {
        lines.push(format!("{} requisições sem resposta", outcome.pending));
    }
    if outcome.deadline_hit {
        lines.push("Janela de captura expirou; resultados parciais".to_string());
    }
    lines
}

impl DisplayFallback for CaptureReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Sessão {} | {} | {} registros",
            self.session_id,
            self.url,
            self.outcome.records.len()
        )];
        lines.extend(outcome_lines(&self.outcome));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub file: String,
    pub outcome: CaptureOutcome,
}

impl DisplayFallback for ReplaySummary {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Replay de {} | {} eventos | {} registros",
            self.file, self.outcome.metrics.events_seen, self.outcome.records.len()
        )];
        lines.extend(outcome_lines(&self.outcome));
        lines.join("\n")
    }
}

impl DisplayFallback for ErrorReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("[{}] {}", self.kind.as_str(), self.title),
            self.message.clone(),
        ];
        if !self.suggestions.is_empty() {
            lines.push("Sugestões:".to_string());
            for suggestion in &self.suggestions {
                lines.push(format!("  - {suggestion}"));
            }
        }
        lines.push(format!(
            "Pode tentar novamente: {}",
            if self.retryable { "sim" } else { "não" }
        ));
        lines
            .into_iter()
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RateLimitVerdict {
    pub info: Option<RateLimitInfo>,
}

impl DisplayFallback for RateLimitVerdict {
    fn display(&self) -> String {
        let Some(info) = &self.info else {
            return "Nenhum header de rate limit reconhecido".to_string();
        };
        let mut lines = Vec::new();
        if let Some(limit) = info.limit {
            lines.push(format!("Limite: {limit}"));
        }
        if let Some(remaining) = info.remaining {
            lines.push(format!("Restante: {remaining}"));
        }
        if let Some(percentage) = info.percentage {
            lines.push(format!("Restante do limite: {percentage}%"));
        }
        if let Some(retry_after) = info.retry_after {
            lines.push(format!("Retry-After: {retry_after}s"));
        }
        if let Some(kind) = &info.limit_type {
            lines.push(format!("Tipo: {kind}"));
        }
        lines.push(format!(
            "Próximo do limite: {}",
            if info.is_approaching_limit {
                "sim"
            } else {
                "não"
            }
        ));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apilens_core::ErrorKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn replay_reads_ndjson_and_classifies() {
        let log = concat!(
            r#"{"event":"request","url":"https://shop.example/api/cart","method":"GET","resource_kind":"xhr"}"#,
            "\n",
            r#"{"event":"response","url":"https://shop.example/api/cart","status":200,"headers":{},"body_text":null}"#,
            "\n",
        );
        let file = write_temp(log);
        let summary = replay_log(&ReplayArgs {
            file: file.path().to_path_buf(),
        })
        .unwrap();
        assert_eq!(summary.outcome.records.len(), 1);
        assert_eq!(summary.outcome.metrics.events_seen, 2);
        assert!(summary.outcome.records[0].response.is_some());
    }

    #[test]
    fn replay_reports_the_offending_line() {
        let file = write_temp("{\"event\":\"request\"\n");
        let err = replay_log(&ReplayArgs {
            file: file.path().to_path_buf(),
        })
        .unwrap_err();
        match err {
            AppError::InvalidInput(message) => assert!(message.starts_with("linha 1")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn diagnose_builds_a_full_report() {
        let report = diagnose_failure(&DiagnoseArgs {
            message: "navigation failed".to_string(),
            code: Some("ERR_NAME_NOT_RESOLVED".to_string()),
            status: None,
        });
        assert_eq!(report.kind, ErrorKind::Dns);
        assert!(report.retryable);
        assert_eq!(
            report.original_error.code.as_deref(),
            Some("ERR_NAME_NOT_RESOLVED")
        );
    }

    #[test]
    fn ratelimit_file_with_numbers_still_parses() {
        let file = write_temp(r#"{"x-ratelimit-limit": 100, "x-ratelimit-remaining": "15"}"#);
        let verdict = inspect_rate_limit(&RatelimitArgs {
            file: file.path().to_path_buf(),
        })
        .unwrap();
        let info = verdict.info.expect("parsed");
        assert_eq!(info.limit, Some(100));
        assert_eq!(info.remaining, Some(15));
        assert!(info.is_approaching_limit);
    }
}
