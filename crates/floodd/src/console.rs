//! Stdin console - local edits and inspection
//!
//! ```text
//! insert <json>   append to the list and broadcast
//! delete <json>   remove from the list and broadcast
//! doc             print the list
//! peers           print neighbours and participants
//! clock           print the causal clock and buffer size
//! help
//! quit
//! ```

use anyhow::Result;
use flood_core::{Session, SharedDocument};
use flood_transport::NodeHandle;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::model::SharedList;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Insert(Value),
    Delete(Value),
    Doc,
    Peers,
    Clock,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let payload = |rest: &str| -> Result<Value, String> {
            if rest.is_empty() {
                return Err(format!("usage: {} <json>", word));
            }
            serde_json::from_str(rest).map_err(|e| format!("invalid JSON: {}", e))
        };

        match word.to_lowercase().as_str() {
            "insert" | "i" => payload(rest).map(Command::Insert),
            "delete" | "d" => payload(rest).map(Command::Delete),
            "doc" => Ok(Command::Doc),
            "peers" => Ok(Command::Peers),
            "clock" => Ok(Command::Clock),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command '{}', try 'help'", other)),
        }
    }
}

/// Read commands from stdin until `quit` or end of input
pub async fn run(handle: NodeHandle, document: SharedList, session: Arc<Session>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(cmd) => execute(cmd, &handle, &document, &session).await?,
            Err(e) => eprintln!("{}", e),
        }
    }

    Ok(())
}

async fn execute(
    cmd: Command,
    handle: &NodeHandle,
    document: &SharedList,
    session: &Session,
) -> Result<()> {
    match cmd {
        // applied to the document by the node task, together with the clock tick
        Command::Insert(data) => handle.insert(data)?,
        Command::Delete(data) => handle.delete(data)?,
        Command::Doc => {
            let doc = document.lock();
            println!("{} ({} items)", session.document_title(), doc.len());
            for (i, item) in doc.items().iter().enumerate() {
                println!("  {}) {}", i + 1, item);
            }
        }
        Command::Peers => {
            let status = handle.status().await?;
            println!("you: {} ({})", handle.local_site(), session.alias());
            let participants = session.participants();
            for site in &status.neighbours {
                let alias = participants
                    .iter()
                    .find(|p| &p.site == site)
                    .map(|p| p.alias.as_str())
                    .unwrap_or("(joining)");
                println!("  {} {}", site, alias);
            }
            if !status.relay.is_empty() {
                println!("relaying to: {:?}", status.relay);
            }
        }
        Command::Clock => {
            let status = handle.status().await?;
            println!("{} pending={}", status.clock, status.pending);
        }
        Command::Help | Command::Quit => {
            println!("commands: insert <json>, delete <json>, doc, peers, clock, quit");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_edits() {
        assert_eq!(
            "insert [\"milk\", \"eggs\"]".parse::<Command>(),
            Ok(Command::Insert(json!(["milk", "eggs"])))
        );
        assert_eq!("d  \"milk\" ".parse::<Command>(), Ok(Command::Delete(json!("milk"))));
        assert_eq!("insert {\"k\": 1}".parse::<Command>(), Ok(Command::Insert(json!({"k": 1}))));
    }

    #[test]
    fn test_parse_inspection() {
        assert_eq!("peers".parse::<Command>(), Ok(Command::Peers));
        assert_eq!("  CLOCK ".parse::<Command>(), Ok(Command::Clock));
        assert_eq!("exit".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!("insert".parse::<Command>().is_err());
        assert!("insert not-json".parse::<Command>().is_err());
        assert!("fly".parse::<Command>().is_err());
    }
}
