//! Interactive REPL for driving an agent from a terminal.

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::agent::Agent;
use crate::error::Result;
use crate::run::{RunEvent, RunResponse};

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "bye"];

/// Installs a `fmt` subscriber honoring `RUST_LOG`. Call once at startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

impl Agent {
    /// Runs a prompt/response loop on stdin/stdout until the user types one
    /// of `exit`, `quit`, or `bye`. With `markdown` set, responses are
    /// rendered with light emphasis stripping for plain terminals.
    pub async fn cli_app(&mut self, markdown: bool) -> Result<()> {
        let stdin = BufReader::new(io::stdin());
        let mut lines = stdin.lines();
        let mut stdout = io::stdout();

        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if EXIT_WORDS.contains(&input.to_ascii_lowercase().as_str()) {
                break;
            }

            let (sender, mut receiver) = mpsc::unbounded_channel();
            let run = self.run_stream(input, sender);
            tokio::pin!(run);
            let mut outcome = None;

            // Print events as they arrive instead of after the run; the
            // channel closes once the run future finishes.
            loop {
                tokio::select! {
                    event = receiver.recv() => {
                        let Some(event) = event else { break };
                        match render_event(&event) {
                            Some(line) => {
                                stdout.write_all(line.as_bytes()).await?;
                            }
                            None => debug!(event = ?event.event, "run event"),
                        }
                    }
                    result = &mut run, if outcome.is_none() => {
                        outcome = Some(result);
                    }
                }
            }

            let Some(run) = outcome else { continue };
            match run {
                Ok(response) => {
                    let text = response.content.unwrap_or_default();
                    let rendered = if markdown { render_markdown(&text) } else { text };
                    stdout.write_all(rendered.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                Err(err) => {
                    stdout
                        .write_all(format!("error: {err}\n").as_bytes())
                        .await?;
                }
            }
        }

        Ok(())
    }
}

/// The printable form of a run event, or `None` for events that only go to
/// the log.
fn render_event(event: &RunResponse) -> Option<String> {
    match event.event {
        RunEvent::ToolCallStarted => {
            let mut out = String::new();
            for call in &event.tool_calls {
                out.push_str(&format!("  [tool] {}({})\n", call.name, call.arguments));
            }
            (!out.is_empty()).then_some(out)
        }
        RunEvent::ToolCallCompleted => event
            .content
            .as_ref()
            .map(|shown| format!("  [result] {shown}\n")),
        _ => None,
    }
}

/// Terminal-friendly markdown: strip emphasis markers, keep structure.
fn render_markdown(text: &str) -> String {
    text.replace("**", "").replace("__", "")
}
