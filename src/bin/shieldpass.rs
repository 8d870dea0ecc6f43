//! shieldpass - command line for temporary shield pauses
//!
//! # Usage
//!
//! ```text
//! shieldpass pause --minutes 5          # lift the shield for five minutes
//! shieldpass restore                    # put it back early
//! shieldpass status                     # shield state and countdown
//! shieldpass history --limit 10         # recent pauses
//! shieldpass summary                    # aggregate statistics
//! shieldpass watch                      # follow lifecycle events
//! shieldpass notify '<json>'            # forward a notification callback
//! shieldpass monitor '<json>'           # forward a usage-monitor callback
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shieldpass_cli::daemon::ensure_daemon_running;
use shieldpass_cli::format::{history_table, reply_line, status_report, summary_report};
use shieldpass_cli::{resolve_socket_path, DaemonClient};
use shieldpass_core::{InteractionId, Trigger, UserAction};
use shieldpass_protocol::{ClientMessage, DaemonMessage};

/// shieldpass - time-boxed pauses for an app shield
#[derive(Parser, Debug)]
#[command(name = "shieldpass", version, about)]
struct Args {
    /// Daemon socket (default: $SHIELDPASS_SOCKET or /tmp/shieldpass.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lift the shield for a while
    Pause {
        /// Pause length in minutes (default from config)
        #[arg(short, long)]
        minutes: Option<u64>,
        /// What to unblock (default: first configured target)
        #[arg(short, long)]
        target: Option<String>,
    },
    /// Put the shield back now
    Restore,
    /// Show shield state and the running pause
    Status,
    /// List closed pauses
    History {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Aggregate statistics
    Summary,
    /// Run the foreground pass (orphan repair, expiry failsafe)
    Foreground,
    /// Ask for a reconcile attributed to a wake-up path
    Trigger {
        /// timer_expired, notification_tapped, manual, monitor_callback, foreground_failsafe
        tag: String,
    },
    /// Forward a raw notification callback (JSON)
    Notify { json: String },
    /// Forward a raw usage-monitor callback (JSON)
    Monitor { json: String },
    /// Record that the shield was shown; prints the interaction id
    ShieldShown {
        target: String,
        #[arg(long, default_value_t = 0)]
        streak_days: u32,
    },
    /// Record the user's response to a shield appearance
    Respond {
        interaction_id: String,
        /// requested_pause, kept_blocked or dismissed
        action: String,
    },
    /// Log an item against the current or just-finished pause
    LogItem,
    /// Follow session lifecycle events
    Watch,
}

fn parse_json(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).context("Callback payload is not valid JSON")
}

fn parse_action(raw: &str) -> Result<UserAction> {
    UserAction::from_tag(raw).with_context(|| format!("Unknown action '{raw}'"))
}

/// Builds the request for a one-shot command. `None` for `Watch`.
fn request_for(command: &Command) -> Result<Option<ClientMessage>> {
    let message = match command {
        Command::Pause { minutes, target } => {
            ClientMessage::start_session(target.clone(), minutes.map(|m| m.saturating_mul(60)))
        }
        Command::Restore => ClientMessage::restore_early(),
        Command::Status => ClientMessage::status(),
        Command::History { limit } => ClientMessage::history(*limit),
        Command::Summary => ClientMessage::summary(),
        Command::Foreground => ClientMessage::foreground(),
        Command::Trigger { tag } => {
            let trigger = Trigger::from_tag(tag)
                .with_context(|| format!("Unknown trigger '{tag}'"))?;
            ClientMessage::reconcile(trigger)
        }
        Command::Notify { json } => ClientMessage::notification_callback(parse_json(json)?),
        Command::Monitor { json } => ClientMessage::monitor_callback(parse_json(json)?),
        Command::ShieldShown {
            target,
            streak_days,
        } => ClientMessage::shield_shown(target.clone(), *streak_days),
        Command::Respond {
            interaction_id,
            action,
        } => ClientMessage::interaction_response(
            InteractionId::new(interaction_id.clone()),
            parse_action(action)?,
        ),
        Command::LogItem => ClientMessage::log_item(),
        Command::Watch => return Ok(None),
    };
    Ok(Some(message))
}

fn print_reply(reply: &DaemonMessage) {
    match reply {
        DaemonMessage::Status { status } => print!("{}", status_report(status)),
        DaemonMessage::History { sessions } => print!("{}", history_table(sessions)),
        DaemonMessage::Summary {
            history,
            interactions,
        } => print!("{}", summary_report(history, interactions)),
        other => println!("{}", reply_line(other)),
    }
}

async fn watch(mut client: DaemonClient) -> Result<()> {
    let first = client.request(ClientMessage::subscribe()).await?;
    print_reply(&first);

    loop {
        tokio::select! {
            event = client.next_event() => print_reply(&event?),
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    client.disconnect().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let socket_path = resolve_socket_path(args.socket);
    let request = request_for(&args.command)?;

    // Commands that change shield state must reach a coordinator
    if matches!(args.command, Command::Pause { .. } | Command::Restore) {
        ensure_daemon_running(&socket_path).await?;
    }

    let mut client = DaemonClient::connect(&socket_path, None).await?;

    let Some(request) = request else {
        return watch(client).await;
    };

    let reply = client.request(request).await?;
    print_reply(&reply);
    client.disconnect().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_minutes_become_seconds() {
        let command = Command::Pause {
            minutes: Some(5),
            target: None,
        };
        let message = request_for(&command).unwrap().unwrap();
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "start_session");
        assert_eq!(json["duration_secs"], 300);
    }

    #[test]
    fn test_unknown_trigger_rejected() {
        let command = Command::Trigger {
            tag: "sometime".to_string(),
        };
        assert!(request_for(&command).is_err());
    }

    #[test]
    fn test_respond_action_parsing() {
        assert_eq!(parse_action("kept_blocked").unwrap(), UserAction::KeptBlocked);
        assert!(parse_action("maybe").is_err());
    }

    #[test]
    fn test_watch_has_no_single_request() {
        assert!(request_for(&Command::Watch).unwrap().is_none());
    }
}
