// Terminal front-end for the chat session: the same connect/submit flow as
// the web UI, reading from stdin and printing the conversation.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use tracing::info;

use crate::actions::Actions;
use crate::session::ChatSession;

const NEW_HANDLE_COMMAND: &str = "/new";
const QUIT_COMMAND: &str = "/quit";

fn prompt_line<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> Result<Option<String>> {
    write!(out, "{}", prompt)?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line).context("Failed to read from stdin")? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

async fn connect_prompt<A, R, W>(session: &mut ChatSession, actions: &A, input: &mut R, out: &mut W) -> Result<bool>
where
    A: Actions + ?Sized,
    R: BufRead,
    W: Write,
{
    let Some(handle) = prompt_line(input, out, "Instagram handle (leave blank to skip): ")? else {
        return Ok(false);
    };
    if handle == QUIT_COMMAND {
        return Ok(false);
    }

    if handle.is_empty() {
        session.skip();
        return Ok(true);
    }

    writeln!(out, "Processing your data... please wait!")?;
    let before = session.messages().len();
    session.connect(actions, &handle).await;
    for message in &session.messages()[before..] {
        writeln!(out, "assistant> {}", message.content)?;
    }
    if let Some(banner) = session.banner(std::time::Instant::now()) {
        writeln!(out, "! {}", banner)?;
    }
    Ok(true)
}

/// Runs an interactive session until `/quit` or end of input. Returns the
/// session so callers can inspect the transcript.
pub async fn run_chat<A, R, W>(actions: &A, mut input: R, mut out: W) -> Result<ChatSession>
where
    A: Actions + ?Sized,
    R: BufRead,
    W: Write,
{
    info!("Starting terminal chat session...");
    let mut session = ChatSession::new();

    loop {
        if !session.is_connected() {
            if !connect_prompt(&mut session, actions, &mut input, &mut out).await? {
                break;
            }
            if !session.is_connected() {
                continue;
            }
            writeln!(
                out,
                "Ask anything about social media content. {} picks another handle, {} exits.",
                NEW_HANDLE_COMMAND, QUIT_COMMAND
            )?;
        }

        let Some(line) = prompt_line(&mut input, &mut out, "you> ")? else {
            break;
        };
        match line.as_str() {
            QUIT_COMMAND => break,
            NEW_HANDLE_COMMAND => session.reset(),
            "" => writeln!(out, "Please provide a query.")?,
            query => {
                if let Some(reply) = session.submit(actions, query).await {
                    writeln!(out, "assistant> {}", reply)?;
                }
            }
        }
    }

    info!(messages = session.messages().len(), "Chat session finished.");
    Ok(session)
}
