//! `toolstream ask`: answer one question and print steps as they close.
//!
//! Without `--server` the orchestrator runs in-process and its frames go
//! through the same encoder the gateway uses, so both paths render through
//! one [`StepReconstructor`].

use futures::StreamExt;
use std::sync::Arc;
use toolstream_agent::{Orchestrator, frame_channel};
use toolstream_config::AppConfig;
use toolstream_wire::{ChatOutput, ChatStatus, StepReconstructor, StepState, StepViewModel};

pub async fn run(question: String, server: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let question = question.trim().to_string();
    if question.is_empty() {
        return Err("question must not be empty".into());
    }

    let output = match server {
        Some(url) => ask_remote(&url, &question).await?,
        None => ask_local(&question).await?,
    };

    println!();
    match (&output.status, &output.final_answer) {
        (ChatStatus::Complete, Some(answer)) => {
            println!("{answer}");
            if !output.tools_used.is_empty() {
                let used: Vec<&str> = output.tools_used.iter().map(String::as_str).collect();
                println!("\n  tools used: {}", used.join(", "));
            }
        }
        _ => {
            eprintln!("  [Interrupted] the stream ended before a final answer");
            return Err("run interrupted".into());
        }
    }

    Ok(())
}

async fn ask_local(question: &str) -> Result<ChatOutput, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.has_api_key() {
        return Err("No API key found (set TOOLSTREAM_API_KEY or OPENAI_API_KEY)".into());
    }

    let provider = toolstream_providers::build_from_config(&config)?;
    let tools = Arc::new(toolstream_tools::default_registry(&config.search)?);
    let orchestrator = Orchestrator::from_config(provider, tools, &config.agent);

    let (sink, frames) = frame_channel(config.agent.stream_buffer);
    let owned = question.to_string();
    let run = tokio::spawn(async move { orchestrator.run(&owned, &sink).await });

    let mut printer = StepPrinter::default();
    let mut reconstructor = StepReconstructor::new(question);
    let mut body = std::pin::pin!(toolstream_wire::encode_stream(frames));
    while let Some(chunk) = body.next().await {
        reconstructor = reconstructor.apply(chunk.as_bytes());
        printer.print_new(reconstructor.output());
    }
    let output = reconstructor.finish();
    printer.print_new(&output);

    if let Err(e) = run.await? {
        eprintln!("  [Error] {e}");
    }
    Ok(output)
}

async fn ask_remote(server: &str, question: &str) -> Result<ChatOutput, Box<dyn std::error::Error>> {
    let url = format!("{}/chat", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&serde_json::json!({ "content": question }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(format!("gateway returned {status}: {text}").into());
    }

    let mut printer = StepPrinter::default();
    let mut reconstructor = StepReconstructor::new(question);
    let mut body = std::pin::pin!(response.bytes_stream());
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                reconstructor = reconstructor.apply(&bytes);
                printer.print_new(reconstructor.output());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Response stream failed");
                break;
            }
        }
    }
    let output = reconstructor.finish();
    printer.print_new(&output);
    Ok(output)
}

/// Prints each step once, in order, as soon as it closes.
#[derive(Default)]
struct StepPrinter {
    printed: usize,
}

impl StepPrinter {
    fn print_new(&mut self, output: &ChatOutput) {
        while let Some(step) = output.steps.get(self.printed) {
            if !step.is_complete() {
                break;
            }
            println!("{}", describe(step));
            self.printed += 1;
        }
    }
}

fn describe(step: &StepViewModel) -> String {
    let arguments = match &step.arguments {
        Some(value) => value.to_string(),
        None => step.raw_arguments.clone(),
    };
    let marker = match &step.state {
        StepState::Complete => String::new(),
        StepState::ParseFailed(reason) => format!("  (unparseable: {reason})"),
        StepState::Interrupted => "  (interrupted)".to_string(),
        StepState::Streaming => "  (streaming)".to_string(),
    };
    format!("  [{}] {} {}{}", step.ordinal + 1, step.tool_name, arguments, marker)
}
