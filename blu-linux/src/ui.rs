//! Terminal front end: stdin commands in, chat lines out.

use blu_core::{DisplayedMessage, MeshSession, SessionView};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::host::HostEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Nick(String),
    Join(String),
    Direct(String),
    EndDirect,
    Peers,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse(line: &str) -> Command {
    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return Command::Say(line.to_string());
    };
    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim().to_string()),
        None => (rest.trim(), String::new()),
    };
    match cmd {
        "nick" => Command::Nick(arg),
        "join" => Command::Join(arg),
        "dm" | "msg" => Command::Direct(arg),
        "end" => Command::EndDirect,
        "peers" | "who" => Command::Peers,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

pub fn render(msg: &DisplayedMessage) -> String {
    if msg.is_system() {
        format!("[{}] * {}", msg.time_string(), msg.text)
    } else {
        format!("[{}] {}: {}", msg.time_string(), msg.sender, msg.text)
    }
}

/// Print messages delivered since the last call.
pub fn print_new(session: &MeshSession, printed: &mut usize) {
    let messages = session.messages();
    for msg in messages.iter().skip(*printed) {
        println!("{}", render(msg));
    }
    *printed = messages.len();
}

pub fn print_view(view: &SessionView) {
    let scope = match &view.active_dm {
        Some(h) => h.clone(),
        None => format!("#{}", view.room),
    };
    println!("{} in {} | {} peer(s)", view.handle, scope, view.peer_count);
    for h in &view.peer_handles {
        println!("  {}", h);
    }
}

pub fn print_help() {
    println!("/nick <handle>  /join <room>  /dm <handle>  /end  /peers  /quit");
}

/// Forward stdin lines to the dispatcher. EOF shuts the session down.
pub async fn read_stdin(events: mpsc::UnboundedSender<HostEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if events.send(HostEvent::Input(line)).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }
    let _ = events.send(HostEvent::Shutdown);
}

#[cfg(test)]
mod tests {
    use super::*;
    use blu_core::Envelope;

    #[test]
    fn parses_commands() {
        assert_eq!(parse("hello there"), Command::Say("hello there".into()));
        assert_eq!(parse("/nick  bob "), Command::Nick("bob".into()));
        assert_eq!(parse("/join general"), Command::Join("general".into()));
        assert_eq!(parse("/dm @b"), Command::Direct("@b".into()));
        assert_eq!(parse("/end"), Command::EndDirect);
        assert_eq!(parse("/peers"), Command::Peers);
        assert_eq!(parse("/quit"), Command::Quit);
        assert_eq!(parse("/dance"), Command::Unknown("dance".into()));
        assert_eq!(parse("/nick"), Command::Nick(String::new()));
    }

    #[test]
    fn renders_chat_and_notices() {
        let chat = DisplayedMessage::from_envelope(&Envelope::new(
            "@b",
            blu_core::Destination::room("bitchat"),
            "hi",
        ));
        assert!(render(&chat).ends_with("] @b: hi"));
        let notice = DisplayedMessage::from_envelope(&Envelope::system("you are now @c"));
        assert!(render(&notice).ends_with("] * you are now @c"));
    }
}
