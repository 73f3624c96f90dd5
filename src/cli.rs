//! CLI utilities for driving a station interactively.
//!
//! The utilities in this module parse user input into [`Command`]s and run
//! them against a [`Link`](crate::Link). They back the `simlink` binary.
//!
//! # Overview
//!
//! - `.exit`: disconnect and quit.
//! - `.version`: station version string.
//! - `.connected`: advisory liveness probe.
//! - `.list [type]`: items in the station, optionally filtered by type code.
//! - `.item <name>`: look an item up and print its id, type and pose.
//! - `.render on|off`: toggle scene rendering.
//! - `.cmd <name> <value>`: free-form station command.
//! - `.message <text>`: show a message in the station status bar.
//!
//! # Example
//! ```rust
//! use simlink::cli::Command;
//!
//! let cmd: Command = ".render off".try_into().unwrap();
//! assert_eq!(cmd, Command::Render(false));
//! ```
use std::{
    io::{BufRead, Write},
    sync::mpsc,
};

use log::{error, info};
use thiserror::Error;

use crate::{Link, error::LinkError, item::ItemType};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,

    #[error("station error: {0}")]
    Link(#[from] LinkError),
}

/// Commands understood by the REPL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Version,
    Connected,
    List(Option<i32>),
    Item(String),
    Render(bool),
    Cmd { name: String, value: String },
    Message(String),
}

fn invalid(command: &str, reason: &str) -> CommandError {
    CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

impl TryInto<Command> for &str {
    type Error = CommandError;

    fn try_into(self) -> Result<Command, Self::Error> {
        let s = self.trim();
        let (head, rest) = match s.split_once(' ') {
            Some((head, rest)) => (head, rest.trim()),
            None => (s, ""),
        };

        match head {
            "" => Err(CommandError::Empty),
            ".exit" => Ok(Command::Exit),
            ".version" => Ok(Command::Version),
            ".connected" => Ok(Command::Connected),
            ".list" if rest.is_empty() => Ok(Command::List(None)),
            ".list" => rest
                .parse::<i32>()
                .map(|t| Command::List(Some(t)))
                .map_err(|_| invalid(".list", "type filter should be an integer. Example: .list 2")),
            ".item" if rest.is_empty() => {
                Err(invalid(".item", "requires an item name. Example: .item Frame 1"))
            }
            ".item" => Ok(Command::Item(rest.to_string())),
            ".render" => match rest {
                "on" => Ok(Command::Render(true)),
                "off" => Ok(Command::Render(false)),
                _ => Err(invalid(".render", "expects 'on' or 'off'")),
            },
            ".cmd" => match rest.split_once(' ') {
                Some((name, value)) => Ok(Command::Cmd {
                    name: name.to_string(),
                    value: value.trim().to_string(),
                }),
                None => Err(invalid(".cmd", "requires a name and a value. Example: .cmd Trace On")),
            },
            ".message" => Ok(Command::Message(rest.to_string())),
            _ => Err(CommandError::UnrecognizedCommand(s.to_string())),
        }
    }
}

/// Prompt user for a valid command.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Option<Command>, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").map_err(LinkError::from)?;
    writer.flush().map_err(LinkError::from)?;

    if reader.read_line(&mut s).map_err(LinkError::from)? == 0 {
        return Ok(None);
    }

    s.as_str().try_into().map(Some)
}

/// Runs one command, returning the text to show the user.
pub fn run(link: &Link, command: &Command) -> Result<Option<String>, CommandError> {
    let out = match command {
        Command::Exit => {
            link.disconnect()?;
            None
        }
        Command::Version => Some(link.version()?),
        Command::Connected => Some(link.is_connected().to_string()),
        Command::List(filter) => {
            let items = link.item_list(filter.map(ItemType::from))?;
            let mut lines = Vec::with_capacity(items.len());
            for item in &items {
                lines.push(format!("{:>12}  {}", item.id(), item.name()?));
            }
            Some(lines.join("\n"))
        }
        Command::Item(name) => match link.item(name, None)? {
            Some(item) => Some(format!(
                "id {} type {:?}\n{}",
                item.id(),
                item.cached_kind(),
                item.pose_abs()?
            )),
            None => Some(format!("no item named '{name}'")),
        },
        Command::Render(on) => {
            link.render(*on)?;
            None
        }
        Command::Cmd { name, value } => Some(link.command(name, value)?),
        Command::Message(text) => {
            link.show_message(text, false)?;
            None
        }
    };
    Ok(out)
}

/// One event for [`repl`]: a parsed command, or a reason to stop.
#[derive(Debug)]
pub enum Input {
    Command(Command),
    EndOfInput,
    Interrupted,
}

/// Runs commands from `inputs` until `.exit`, end of input or an interrupt.
///
/// Inputs queued behind an interrupt are dropped. The link is disconnected
/// on every way out.
pub fn repl<W: Write>(
    link: &Link,
    inputs: &mpsc::Receiver<Input>,
    mut out: W,
) -> Result<(), CommandError> {
    while let Ok(input) = inputs.recv() {
        let cmd = match input {
            Input::Command(cmd) => cmd,
            Input::EndOfInput => break,
            Input::Interrupted => {
                info!("interrupted, disconnecting");
                break;
            }
        };

        match run(link, &cmd) {
            Ok(Some(text)) => writeln!(out, "{text}").map_err(LinkError::from)?,
            Ok(None) => {}
            Err(e) => {
                error!("{cmd:?} failed: {e}");
                writeln!(out, "error: {e}").map_err(LinkError::from)?;
            }
        }

        if cmd == Command::Exit {
            return Ok(());
        }
    }

    link.disconnect()?;
    Ok(())
}
