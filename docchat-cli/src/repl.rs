//! Interactive chat loop.

use anyhow::Result;
use docchat_rag::{ChatEngine, Role};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

const HELP: &str = "Commands: /history, /new, /sources, /help, /quit";

/// Ask a yes/no question on the terminal.
pub fn confirm(question: &str) -> Result<bool> {
    let mut editor = DefaultEditor::new()?;
    match editor.readline(&format!("{question} [y/N] ")) {
        Ok(answer) => Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Chat until EOF or `/quit`, keeping one session.
pub async fn run(engine: &ChatEngine) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut session: Option<String> = None;
    let mut show_sources = true;

    let stats = engine.stats().await?;
    println!(
        "docchat ({} mode, {} documents). {HELP}",
        stats.answer_mode, stats.document_count
    );

    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        match input {
            "/quit" | "/exit" => break,
            "/help" => println!("{HELP}"),
            "/sources" => {
                show_sources = !show_sources;
                println!("sources {}", if show_sources { "on" } else { "off" });
            }
            "/new" => {
                if let Some(id) = session.take() {
                    engine.end_session(&id);
                }
                println!("started a new conversation");
            }
            "/history" => match &session {
                Some(id) => {
                    for turn in engine.history(id).await {
                        let who = match turn.role {
                            Role::User => "you",
                            Role::Assistant => "bot",
                        };
                        println!("[{}] {who}> {}", turn.timestamp.format("%H:%M:%S"), turn.content);
                    }
                }
                None => println!("no conversation yet"),
            },
            message => match engine.ask(message, session.as_deref()).await {
                Ok(reply) => {
                    println!("bot> {}", reply.response);
                    if show_sources && !reply.sources.is_empty() {
                        let sources: Vec<&str> = reply.sources.iter().map(String::as_str).collect();
                        println!("     sources: {}", sources.join(", "));
                    }
                    session = Some(reply.session_id);
                }
                Err(e) => println!("error: {}", e.user_message()),
            },
        }
    }

    if let Some(id) = session {
        engine.end_session(&id);
    }
    Ok(())
}
