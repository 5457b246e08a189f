//! Line-oriented interactive chat

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::chat_stream::StreamMessage;
use crate::core::conversation::StreamUpdate;
use crate::core::message::{ConversationId, Transcript};
use crate::core::runtime::ChatRuntime;

#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput<'a> {
    Empty,
    Message(&'a str),
    Regenerate,
    New,
    Rename(&'a str),
    History,
    Quit,
    Unknown(&'a str),
}

pub fn parse_input(line: &str) -> ChatInput<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatInput::Message(trimmed);
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));
    match name {
        "regenerate" | "retry" => ChatInput::Regenerate,
        "new" => ChatInput::New,
        "rename" => ChatInput::Rename(rest),
        "history" => ChatInput::History,
        "quit" | "exit" => ChatInput::Quit,
        _ => ChatInput::Unknown(name),
    }
}

pub async fn run_chat(
    mut runtime: ChatRuntime,
    conversation: Option<ConversationId>,
) -> Result<(), Box<dyn Error>> {
    let id = runtime.open(conversation).await?;
    println!("💬 {} ({id})", runtime.conversation().title());
    if !runtime.conversation().transcript().is_empty() {
        print_transcript(runtime.conversation().transcript());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match parse_input(&line) {
            ChatInput::Empty => {}
            ChatInput::Quit => break,
            ChatInput::Message(text) => {
                let submitted = runtime.submit(text).await;
                match submitted {
                    Ok(_) => stream_reply(&mut runtime).await?,
                    Err(err) => eprintln!("❌ {err}"),
                }
            }
            ChatInput::Regenerate => {
                let regenerated = runtime.regenerate().await;
                match regenerated {
                    Ok(_) => stream_reply(&mut runtime).await?,
                    Err(err) => eprintln!("❌ {err}"),
                }
            }
            ChatInput::New => {
                let id = runtime.reset().await;
                println!("💬 New conversation ({id})");
            }
            ChatInput::Rename(title) => {
                let renamed = runtime.conversation_mut().rename(title).await;
                match renamed {
                    Ok(()) => println!("✅ Renamed to: {}", runtime.conversation().title()),
                    Err(err) => eprintln!("❌ {err}"),
                }
            }
            ChatInput::History => print_transcript(runtime.conversation().transcript()),
            ChatInput::Unknown(name) => eprintln!("⚠️  Unknown command: /{name}"),
        }
    }

    Ok(())
}

enum Step {
    Received(Option<(StreamMessage, u64)>),
    Interrupted,
}

/// Prints deltas as they arrive until the session ends or Ctrl+C cancels it.
pub(crate) async fn stream_reply(runtime: &mut ChatRuntime) -> io::Result<()> {
    let mut stdout = io::stdout();
    loop {
        // Only the receive races Ctrl+C; applying a message may persist the reply.
        let step = tokio::select! {
            received = runtime.recv() => Step::Received(received),
            _ = tokio::signal::ctrl_c() => Step::Interrupted,
        };

        let update = match step {
            Step::Interrupted => {
                runtime.cancel().await;
                println!("\n⏹  Cancelled");
                return Ok(());
            }
            Step::Received(None) => None,
            Step::Received(Some((message, stream_id))) => {
                Some(runtime.apply(message, stream_id).await)
            }
        };

        match update {
            None => return Ok(()),
            Some(StreamUpdate::Ignored) => {}
            Some(StreamUpdate::Delta(text)) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            Some(StreamUpdate::Completed { saved }) => {
                writeln!(stdout)?;
                let replied = runtime
                    .conversation()
                    .transcript()
                    .last()
                    .is_some_and(|last| last.is_assistant());
                if !saved && replied {
                    eprintln!("⚠️  Reply was not saved");
                }
                return Ok(());
            }
            Some(StreamUpdate::Failed { error, .. }) => {
                writeln!(stdout)?;
                eprintln!("❌ {error}");
                return Ok(());
            }
        }
    }
}

fn print_transcript(transcript: &Transcript) {
    for message in transcript.messages() {
        let label = if message.is_user() { "You" } else { "Assistant" };
        println!("{label}: {}", message.content);
    }
}
