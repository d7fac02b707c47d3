#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]
use prism::constants::{
    API_KEY_ENV_VARS, DEFAULT_BASE_URL, DEFAULT_MODEL, THINK_BLOCK_CLOSE, THINK_BLOCK_OPEN,
};
use prism::{
    AdapterConfig, ChatClient, MemoryCredentialStore, MessagePart, ObservedError, PrismError,
    ProgressSink, StreamUnit, TurnRecord, Usage,
};

use clap::Parser;
use colored::Colorize;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Streaming chat adapter for OpenAI-compatible endpoints", long_about = None)]
struct Args {
    /// Prompt text; read from stdin when omitted
    prompt: Option<String>,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// System prompt prepended to the conversation
    #[arg(long)]
    system: Option<String>,

    #[arg(long, default_value_t = 0.7)]
    temperature: f32,

    #[arg(long)]
    top_p: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Fetch the whole reply at once instead of streaming
    #[arg(long, default_value_t = false)]
    no_stream: bool,

    /// Probe the endpoint and credential, then exit
    #[arg(long, default_value_t = false)]
    check: bool,

    #[arg(long, default_value_t = 300)]
    request_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,
}

/// Writes text deltas straight to stdout, dimming reasoning blocks, and
/// renders finalized tool calls as labeled blocks.
struct StdoutSink {
    in_think: bool,
}

impl StdoutSink {
    fn new() -> Self {
        Self { in_think: false }
    }

    fn print_text(&mut self, text: &str) {
        // Block decorations arrive whole inside one text unit, so scanning
        // per unit is enough.
        let mut rest = text;
        loop {
            let marker = if self.in_think {
                THINK_BLOCK_CLOSE
            } else {
                THINK_BLOCK_OPEN
            };
            match rest.find(marker) {
                Some(pos) => {
                    self.print_segment(&rest[..pos]);
                    print!("{}", marker.dimmed());
                    self.in_think = !self.in_think;
                    rest = &rest[pos + marker.len()..];
                }
                None => {
                    self.print_segment(rest);
                    break;
                }
            }
        }
        let _ = std::io::stdout().flush();
    }

    fn print_segment(&self, segment: &str) {
        if segment.is_empty() {
            return;
        }
        if self.in_think {
            print!("{}", segment.dimmed());
        } else {
            print!("{}", segment);
        }
    }
}

impl ProgressSink for StdoutSink {
    fn emit(&mut self, unit: StreamUnit) {
        match unit {
            StreamUnit::Text(text) => self.print_text(&text),
            StreamUnit::ToolCall(call) => {
                let arguments = match serde_json::to_string_pretty(&call.arguments) {
                    Ok(s) => s,
                    Err(_) => call.arguments.to_string(),
                };
                println!();
                println!(
                    "{} {} {}",
                    "[tool]".cyan().bold(),
                    call.name.bold(),
                    format!("({})", call.id).dimmed()
                );
                println!("{}", arguments);
            }
        }
    }
}

fn report_failure(err: ObservedError) -> ! {
    tracing::error!("request failed: {}", err);
    eprintln!("{} {}", "error:".red().bold(), err.inner);
    if matches!(err.inner, PrismError::Auth(_)) {
        eprintln!("the stored API key was rejected and cleared; provide a fresh one");
    }
    std::process::exit(1);
}

fn print_usage_line(usage: &Option<Usage>, chunks: Option<usize>) {
    let tokens = match usage {
        Some(u) => format!("{}p/{}c tokens", u.prompt_tokens, u.completion_tokens),
        None => "token usage unavailable".to_string(),
    };
    let line = match chunks {
        Some(n) => format!("[{} chunks | {}]", n, tokens),
        None => format!("[{}]", tokens),
    };
    eprintln!("{}", line.dimmed());
}

fn read_prompt(args: &Args) -> String {
    if let Some(prompt) = &args.prompt {
        return prompt.clone();
    }
    let mut buffer = String::new();
    let read_ok = std::io::stdin().read_to_string(&mut buffer).is_ok();
    if !read_ok || buffer.trim().is_empty() {
        eprintln!(
            "{} no prompt given (pass it as an argument or on stdin)",
            "error:".red().bold()
        );
        std::process::exit(2);
    }
    buffer.trim().to_string()
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "prism=info".into(),
    };

    let file_appender = tracing_appender::rolling::daily(".", "prism.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(tracing_error::ErrorLayer::default())
        .init();

    let args = Args::parse();

    let api_key = API_KEY_ENV_VARS.iter().find_map(|var| match std::env::var(var) {
        Ok(k) if !k.is_empty() => Some(k),
        _ => None,
    });
    let api_key = match api_key {
        Some(k) => k,
        None => {
            eprintln!(
                "{} no API key found; set one of: {}",
                "error:".red().bold(),
                API_KEY_ENV_VARS.join(", ")
            );
            eprintln!("You can also put it in a .env file.");
            std::process::exit(1);
        }
    };
    let credentials = Arc::new(MemoryCredentialStore::with_secret(api_key));

    let http = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(args.request_timeout_secs))
        .connect_timeout(std::time::Duration::from_secs(args.connect_timeout_secs))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "{} failed to build HTTP client: {}",
                "error:".red().bold(),
                e
            );
            std::process::exit(1);
        }
    };

    let config = AdapterConfig {
        base_url: args.base_url.clone(),
        model: args.model.clone(),
        temperature: Some(args.temperature),
        top_p: args.top_p,
        max_tokens: args.max_tokens,
        stop: None,
    };
    let client = ChatClient::new(http, config, credentials);

    if args.check {
        match client.verify_connection().await {
            Ok(()) => {
                println!(
                    "{} {} reachable, credential accepted",
                    "ok:".green().bold(),
                    args.base_url
                );
                return;
            }
            Err(e) => report_failure(e),
        }
    }

    let prompt = read_prompt(&args);
    let mut history = Vec::new();
    if let Some(system) = &args.system {
        history.push(TurnRecord::system(system.clone()));
    }
    history.push(TurnRecord::user(prompt));

    if args.no_stream {
        match client.complete(&history, None).await {
            Ok(completion) => {
                for part in completion.message_parts() {
                    match part {
                        MessagePart::Text { content } => println!("{}", content),
                        MessagePart::ToolCall {
                            id,
                            name,
                            arguments,
                        } => {
                            let rendered = match serde_json::to_string_pretty(&arguments) {
                                Ok(s) => s,
                                Err(_) => arguments.to_string(),
                            };
                            println!(
                                "{} {} {}",
                                "[tool]".cyan().bold(),
                                name.bold(),
                                format!("({})", id).dimmed()
                            );
                            println!("{}", rendered);
                        }
                        _ => {}
                    }
                }
                print_usage_line(&completion.usage, None);
            }
            Err(e) => report_failure(e),
        }
        return;
    }

    let cancel = CancellationToken::new();
    let interrupt_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "interrupt received, stopping stream...".yellow());
            interrupt_token.cancel();
        }
    });

    let mut sink = StdoutSink::new();
    match client
        .stream_response(&history, None, &mut sink, cancel)
        .await
    {
        Ok(outcome) => {
            println!();
            if outcome.cancelled {
                eprintln!(
                    "{}",
                    "[stream cancelled, partial output discarded]".dimmed()
                );
            } else {
                print_usage_line(&outcome.usage, Some(outcome.chunks));
            }
        }
        Err(e) => report_failure(e),
    }
}
