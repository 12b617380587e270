// src/core/commands.rs

//! Parsing of the administrative commands clients send with a leading `!`.

use super::errors::RelayError;
use super::identity::SessionId;
use std::fmt;
use std::net::SocketAddr;

/// Which client an operator command refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanTarget {
    Session(SessionId),
    Addr(SocketAddr),
}

impl BanTarget {
    /// Accepts a bare session id (`7`), the welcome-line form (`7@127.0.0.1:5000`),
    /// or a remote address (`127.0.0.1:5000`).
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        if let Ok(id) = raw.parse::<SessionId>() {
            return Ok(BanTarget::Session(id));
        }
        if let Some((id, _addr)) = raw.split_once('@')
            && let Ok(id) = id.parse::<SessionId>()
        {
            return Ok(BanTarget::Session(id));
        }
        raw.parse::<SocketAddr>()
            .map(BanTarget::Addr)
            .map_err(|_| RelayError::InvalidTarget(raw.to_string()))
    }
}

impl fmt::Display for BanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BanTarget::Session(id) => write!(f, "session {id}"),
            BanTarget::Addr(addr) => write!(f, "{addr}"),
        }
    }
}

/// A recognized administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Removes the target from the client registry.
    Ban(BanTarget),
}

impl AdminCommand {
    /// Parses the payload that followed the `!`. Arguments are separated by single spaces.
    pub fn parse(payload: &[u8]) -> Result<Self, RelayError> {
        let text = String::from_utf8_lossy(payload);
        let mut args = text.trim().split(' ');
        let name = args.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = args.collect();

        match name.as_str() {
            "ban" => {
                if args.len() != 1 || args[0].is_empty() {
                    return Err(RelayError::WrongArgumentCount("ban".to_string()));
                }
                Ok(AdminCommand::Ban(BanTarget::parse(args[0])?))
            }
            _ => Err(RelayError::UnknownCommand(name)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdminCommand::Ban(_) => "ban",
        }
    }
}
