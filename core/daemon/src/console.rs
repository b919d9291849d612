//! Operator console: one control command per stdin line.

use qmon_core::{CommandOutcome, ControlCommand};
use std::io::{self, BufRead};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::worker::{request, Message};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

pub const HELP: &str = "\
commands:
  mute | unmute | toggle-mute
  snooze <minutes>          0 clears
  filter [text]             empty clears
  favorite <name>
  sort-calls <asc|desc|off>
  sort-status <asc|desc|off>
  section <key> <on|off>
  presence <name>[, <name>...]
  refresh | reset | help | quit";

/// Reads stdin on its own thread. End of input stops the reader only; `quit`
/// also stops the worker.
pub fn spawn(tx: Sender<Message>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("qmon-console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!(error = %err, "Console read failed");
                        break;
                    }
                };
                if !handle_line(&tx, line.trim()) {
                    break;
                }
            }
            tracing::debug!("Console closed");
        })
}

/// Returns false once the console should stop.
fn handle_line(tx: &Sender<Message>, line: &str) -> bool {
    match line {
        "" => return true,
        "help" | "?" => {
            println!("{}", HELP);
            return true;
        }
        "quit" | "exit" => {
            let _ = tx.send(Message::Shutdown);
            return false;
        }
        _ => {}
    }

    let command = match line.parse::<ControlCommand>() {
        Ok(command) => command,
        Err(err) => {
            println!("{}", err);
            return true;
        }
    };

    match request(tx, command, REPLY_TIMEOUT) {
        Ok(outcome) => println!("{}", describe(&outcome)),
        Err(err) => {
            println!("{}", err);
            return false;
        }
    }
    true
}

fn describe(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Updated => "ok".to_string(),
        CommandOutcome::RefreshRequested => "refreshing".to_string(),
        CommandOutcome::Reset => "state reset".to_string(),
        CommandOutcome::Presence(results) => results
            .iter()
            .map(|result| {
                let mark = if result.present { "present" } else { "absent" };
                format!("{}: {}", result.query, mark)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
