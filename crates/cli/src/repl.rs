use std::io::{self, Write};
use std::time::Duration;

use gaia_core::AgentCore;
use gaia_core::types::{ActionEvent, Intent, TurnEvent, TurnOutcome};
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SPINNER: [&str; 4] = ["-", "\\", "|", "/"];

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}

/// Read lines, run one turn per line and stream its output.
pub async fn run(
    agent: &AgentCore,
    session_id: &str,
    token: CancellationToken,
    startup_notice: Option<String>,
) -> anyhow::Result<()> {
    if let Some(notice) = startup_notice {
        println!("{notice}");
    }
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    spawn_input_thread(line_tx, ready_rx);
    request_next_prompt(&ready_tx);

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = line_rx.recv() => line,
        };
        let text = match line {
            Some(InputEvent::Line(line)) => line.trim().to_owned(),
            Some(InputEvent::Error(err)) => {
                eprintln!("input error: {err}");
                break;
            }
            Some(InputEvent::Interrupted | InputEvent::Eof) | None => break,
        };
        if text.is_empty() {
            request_next_prompt(&ready_tx);
            continue;
        }

        let Some(outcome) = run_turn(agent, session_id, &text, &token).await? else {
            break;
        };
        if outcome.intent == Intent::Exit {
            break;
        }
        request_next_prompt(&ready_tx);
    }
    drop(ready_tx);
    println!();
    Ok(())
}

/// `None` when shutdown interrupted the turn.
async fn run_turn(
    agent: &AgentCore,
    session_id: &str,
    text: &str,
    token: &CancellationToken,
) -> anyhow::Result<Option<TurnOutcome>> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let turn = agent.run_turn(session_id, text, Some(&event_tx));
    tokio::pin!(turn);

    let mut spinner_idx = 0;
    let mut spinner = tokio::time::interval(Duration::from_millis(100));
    spinner.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut waiting = true;
    let mut streamed = false;

    let outcome = loop {
        tokio::select! {
            _ = token.cancelled() => {
                clear_current_line()?;
                return Ok(None);
            }
            outcome = &mut turn => break outcome,
            Some(event) = event_rx.recv() => {
                if waiting {
                    waiting = false;
                    clear_current_line()?;
                }
                streamed |= render(&event)?;
            }
            _ = spinner.tick(), if waiting => {
                spinner_idx = (spinner_idx + 1) % SPINNER.len();
                print!("\rthinking... {}", SPINNER[spinner_idx]);
                io::stdout().flush()?;
            }
        }
    };
    while let Ok(event) = event_rx.try_recv() {
        streamed |= render(&event)?;
    }
    if waiting {
        clear_current_line()?;
    }

    // Streamed tokens are the raw marked-up reply; repeat the routed text.
    if streamed {
        println!();
    }
    println!("GAIA> {}", outcome.response);
    Ok(Some(outcome))
}

/// Returns true when a token was printed.
fn render(event: &TurnEvent) -> anyhow::Result<bool> {
    match event {
        TurnEvent::Token(token) => {
            print!("{token}");
            io::stdout().flush()?;
            return Ok(true);
        }
        TurnEvent::Interruption(reason) => println!("\n[interrupted: {reason}]"),
        TurnEvent::Action(action) => match action {
            ActionEvent::ActionStart | ActionEvent::ActionEnd | ActionEvent::ActionReflect { .. } => {}
            ActionEvent::ActionExecuting { command } => println!("\n[running {command}]"),
            ActionEvent::ActionBlocked { command, reason } => println!("\n[blocked {command}: {reason}]"),
            ActionEvent::ActionSuccess { output, .. } => println!("{output}"),
            ActionEvent::ActionFailure { command, error } => println!("\n[{command} failed: {error}]"),
        },
    }
    Ok(false)
}

fn clear_current_line() -> anyhow::Result<()> {
    print!("\r\x1b[2K");
    io::stdout().flush()?;
    Ok(())
}

fn request_next_prompt(ready_tx: &std::sync::mpsc::Sender<()>) {
    let _ = ready_tx.send(());
}

/// rustyline blocks, so it lives on its own thread and reads one line per request.
fn spawn_input_thread(line_tx: mpsc::UnboundedSender<InputEvent>, ready_rx: std::sync::mpsc::Receiver<()>) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while ready_rx.recv().is_ok() {
            let event = match editor.readline("You> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    InputEvent::Line(line)
                }
                Err(ReadlineError::Interrupted) => InputEvent::Interrupted,
                Err(ReadlineError::Eof) => InputEvent::Eof,
                Err(e) => InputEvent::Error(e.to_string()),
            };
            let done = !matches!(event, InputEvent::Line(_));
            if line_tx.send(event).is_err() || done {
                break;
            }
        }
    });
}
