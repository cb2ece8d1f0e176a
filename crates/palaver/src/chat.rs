//! The interactive terminal chat.

use std::io::Write as _;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use palaver::AppState;
use palaver_core::{NewTurn, RelayOutcome, Role, relay};
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

const BAR_CHAR: &str = "▎";

pub async fn run(state: AppState) {
    println!(
        "{} conversation {}, /history to review, /clear to start over",
        BAR_CHAR.bright_cyan(),
        state.conversation.id().bright_white()
    );

    let mut stdin = io::BufReader::new(io::stdin());
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line(&mut stdin).await else {
            break;
        };
        let result = match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => print_history(&state).await,
            "/clear" => match state.conversation.clear_all().await {
                Ok(count) => {
                    println!("{}cleared {count} turns", BAR_CHAR.bright_yellow());
                    Ok(())
                }
                Err(err) => Err(err),
            },
            text => send(&state, text).await,
        };
        if let Err(err) = result {
            println!("{}❌ {err}", BAR_CHAR.bright_red());
        }
    }
}

async fn send(state: &AppState, text: &str) -> Result<(), palaver_core::Error> {
    let history = state.conversation.materialize().await?;
    let completion = state.completer.complete(history, Some(text), &[]).await?;

    let (tx, mut rx) = mpsc::channel(1);
    let relay_task = tokio::spawn(relay(completion, tx));

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(progress_style);
    progress_bar.set_message("🤔 Thinking...");

    let mut started = false;
    let mut failure = None;
    loop {
        let item = select! {
            item = rx.recv() => item,
            _ = sleep(Duration::from_millis(100)), if !started => {
                progress_bar.inc(1);
                continue;
            }
        };
        match item {
            Some(Ok(fragment)) => {
                if !started {
                    // Finish the progress bar before printing anything else.
                    progress_bar.finish_and_clear();
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                    started = true;
                }
                print!("{}", fragment.bright_white());
                std::io::stdout().flush().ok();
            }
            Some(Err(err)) => failure = Some(err),
            None => break,
        }
    }
    progress_bar.finish_and_clear();
    if started {
        println!();
    }
    if let Some(err) = failure {
        return Err(err);
    }

    let reply = match relay_task.await {
        Ok(RelayOutcome::Completed { fragments }) => fragments.concat(),
        Ok(outcome) => {
            warn!("relay ended early: {outcome:?}");
            return Ok(());
        }
        Err(err) => {
            error!("relay task failed: {err}");
            return Ok(());
        }
    };
    if reply.is_empty() {
        warn!("the model returned an empty reply, not saving it");
        return Ok(());
    }
    state
        .conversation
        .commit(NewTurn::user(Some(text), &[]), NewTurn::model_text(reply))
        .await?;
    Ok(())
}

async fn print_history(state: &AppState) -> Result<(), palaver_core::Error> {
    let turns = state.conversation.history().await?;
    if turns.is_empty() {
        println!("{}(empty)", BAR_CHAR.bright_black());
    }
    for turn in turns {
        let (bar, icon) = match turn.role {
            Role::User => (BAR_CHAR.bright_green().to_string(), "🧑"),
            Role::Model => (BAR_CHAR.bright_cyan().to_string(), "🤖"),
        };
        for part in &turn.parts {
            match (part.as_text(), part.as_attachment()) {
                (Some(text), _) => println!("{bar}{icon} {}", text.bright_white()),
                (None, Some((kind, _))) => {
                    let name = part.file_name().unwrap_or("unnamed");
                    println!("{bar}{icon} [{kind:?}: {name}]");
                }
                (None, None) => {}
            }
        }
    }
    Ok(())
}

async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Option<String> {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
