//! CLI REPL: one local conversation over stdin/stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::Orchestrator;
use crate::profile::ANONYMOUS_USER_ID;

/// Command that ends the session.
const QUIT: &str = "/quit";

/// Read lines from stdin until EOF or `/quit`, printing each turn's reply.
pub async fn run_repl(orchestrator: Arc<Orchestrator>) {
    let session_id = Uuid::new_v4().to_string();
    run_repl_from(orchestrator, &session_id, BufReader::new(tokio::io::stdin())).await;
}

/// Same as [`run_repl`] over any line source, in session `session_id`.
pub async fn run_repl_from<R>(orchestrator: Arc<Orchestrator>, session_id: &str, reader: R)
where
    R: AsyncBufRead + Unpin,
{
    tracing::info!(session_id = %session_id, "CLI session started");

    let mut lines = reader.lines();
    eprintln!("How are you feeling today? (type {QUIT} to exit)");
    eprint!("> ");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Error reading input: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            eprint!("> ");
            continue;
        }
        if line == QUIT {
            break;
        }

        match orchestrator.handle_turn(session_id, ANONYMOUS_USER_ID, line).await {
            Ok(outcome) => println!("\n{}\n", outcome.render()),
            Err(PipelineError::EmptyInput) => {}
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Turn failed");
                eprintln!("Sorry, something went wrong. Please try again.");
            }
        }
        eprint!("> ");
    }

    tracing::info!(session_id = %session_id, "CLI session ended");
    eprintln!("Take care.");
}
