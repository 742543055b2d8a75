//! Terminal host: renders the session on one status line and maps typed
//! commands, focus commands and Ctrl-C onto the controller.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::models::CompletedSession;
use crate::signal::CuePreferences;
use crate::timer::{SessionStatus, SessionView, TimerController};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    TogglePause,
    AddTime(u32),
    Hide,
    Show,
    Reset,
    Quit,
}

/// `p`, `+N`, `h`, `v`, `r`, `q`. Blank or unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<HostCommand> {
    let line = line.trim();
    if let Some(amount) = line.strip_prefix('+') {
        return amount.trim().parse().ok().map(HostCommand::AddTime);
    }
    match line {
        "p" => Some(HostCommand::TogglePause),
        "h" => Some(HostCommand::Hide),
        "v" => Some(HostCommand::Show),
        "r" => Some(HostCommand::Reset),
        "q" => Some(HostCommand::Quit),
        _ => None,
    }
}

/// `MM:SS`, or `H:MM:SS` from an hour up. Partial seconds round up so the
/// display reads 00:00 only when time is actually up.
pub fn format_clock(ms: u64) -> String {
    let total_secs = ms.div_ceil(1000);
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

pub fn format_view(view: &SessionView) -> String {
    let label = view.app.label();
    match view.status {
        SessionStatus::Idle => format!("{label}  idle"),
        SessionStatus::Completed => format!("{label}  complete"),
        SessionStatus::Running | SessionStatus::Paused => {
            let phase = view.phase_key.as_deref().unwrap_or("-");
            let mut line = format!("{label}  {phase}  {}", format_clock(view.phase_remaining_ms));
            if view.cycle_count > 1 {
                line.push_str(&format!("  cycle {}/{}", view.cycle, view.cycle_count));
            }
            if view.session_remaining_ms != view.phase_remaining_ms {
                line.push_str(&format!("  total {}", format_clock(view.session_remaining_ms)));
            }
            if view.status == SessionStatus::Paused {
                line.push_str("  [paused]");
            }
            if !view.visible {
                line.push_str("  [hidden]");
            }
            line
        }
    }
}

pub fn format_history_row(session: &CompletedSession) -> String {
    format!(
        "{}  {:<10} planned {:>8}  took {:>8}  cycles {}",
        session.completed_at.format("%Y-%m-%d %H:%M"),
        session.app.label(),
        format_clock(session.planned_ms),
        format_clock(session.wall_ms()),
        session.cycle_count
    )
}

pub fn format_cues(cues: &CuePreferences) -> String {
    let state = |on: bool| if on { "on" } else { "off" };
    format!(
        "sound {}  vibration {}  notifications {}",
        state(cues.sound),
        state(cues.vibration),
        state(cues.notifications)
    )
}

fn render(view: &SessionView) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "\r\x1b[2K{}", format_view(view));
    let _ = stdout.flush();
}

/// Runs until the session completes, the user quits, or Ctrl-C. The session
/// is always persisted on the way out.
pub async fn run_interactive(controller: TimerController) -> Result<()> {
    let mut views = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last = controller.view().await;
    render(&last);
    eprintln!("\n(p pause/resume, +N add seconds, h hide, v show, r reset, q quit)");

    loop {
        if last.status == SessionStatus::Completed
            || (!stdin_open && !matches!(last.status, SessionStatus::Running))
        {
            break;
        }

        tokio::select! {
            received = views.recv() => match received {
                Ok(view) => {
                    render(&view);
                    last = view;
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                match parse_command(&line) {
                    Some(HostCommand::Quit) => break,
                    Some(command) => apply(&controller, command).await,
                    None if line.trim().is_empty() => {}
                    None => eprintln!("unknown command: {}", line.trim()),
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    controller.on_hidden().await;
    controller.shutdown().await;
    println!();
    Ok(())
}

async fn apply(controller: &TimerController, command: HostCommand) {
    match command {
        HostCommand::TogglePause => {
            controller.toggle_pause().await;
        }
        HostCommand::AddTime(seconds) => {
            if let Err(err) = controller.add_time(seconds).await {
                log_warn!("{err}");
            }
        }
        HostCommand::Hide => {
            controller.on_hidden().await;
        }
        HostCommand::Show => {
            controller.on_visible().await;
        }
        HostCommand::Reset => {
            controller.reset().await;
        }
        HostCommand::Quit => {}
    }
}
