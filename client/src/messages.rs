//! Server text-frame classification.
//!
//! The server multiplexes chat, command output, and moderation data over
//! plain text frames, distinguished only by line prefixes. Whois output
//! spans several lines, so classification is stateful.

use crate::player::Rank;
use log::warn;
use std::collections::HashMap;
use std::net::IpAddr;

const WHOIS_HEADER: &str = "Client information for: ";

/// The sender header of a chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPlayer {
    pub rank: Rank,
    pub id: Option<i32>,
    pub nickname: Option<String>,
    /// Relayed from the bridged Discord channel.
    pub is_discord: bool,
    pub header: String,
}

impl ChatPlayer {
    /// Parses the portion of a chat line before `": "`. Headers come in
    /// four shapes: `(M) nick`, `[D] nick`, `[id] nick`, or a bare id or
    /// nickname.
    pub fn parse_header(header: &str) -> ChatPlayer {
        let mut rank = Rank::Player;
        let mut id = None;
        let mut nickname = None;
        let mut is_discord = false;
        let mut rest = header;

        if let Some(marker) = header.strip_prefix('(') {
            rank = marker.chars().next().map(Rank::from_prefix).unwrap_or(Rank::None);
            rest = header.get(4..).unwrap_or("");
        } else if let Some(after) = header.strip_prefix("[D]") {
            rank = Rank::None;
            is_discord = true;
            rest = after.strip_prefix(' ').unwrap_or(after);
        } else if header.starts_with('[') {
            if let Some(end) = header.find(']') {
                id = header[1..end].parse().ok();
                rest = header.get(end + 2..).unwrap_or("");
            }
        } else if let Ok(bare_id) = header.parse() {
            id = Some(bare_id);
            rest = "";
        }
        if !rest.is_empty() {
            nickname = Some(rest.to_string());
        }
        ChatPlayer {
            rank,
            id,
            nickname,
            is_discord,
            header: header.to_string(),
        }
    }

    /// Nickname if set, otherwise the numeric id.
    pub fn display(&self) -> String {
        self.nickname
            .clone()
            .or_else(|| self.id.map(|id| id.to_string()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: ChatPlayer,
    pub content: String,
}

/// Moderation data returned by `/whois`. IP and origin are only present
/// when the requester is a moderator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoisRecord {
    pub player_id: i32,
    pub connections: u32,
    pub ip: Option<IpAddr>,
    pub origin_header: Option<String>,
    pub warning_level: u32,
    pub rank: Rank,
}

impl WhoisRecord {
    /// Parses the accumulated whois lines: the target id first, then
    /// `Key: Value` pairs ending with the rank line.
    fn parse(lines: &[String]) -> Option<WhoisRecord> {
        let player_id = lines.first()?.trim().parse().ok()?;
        let values: HashMap<&str, &str> = lines[1..]
            .iter()
            .filter_map(|line| line.split_once(": "))
            .collect();
        let connections = values.get("Connections by this IP")?.parse().ok()?;
        let warning_level = values.get("Warning level")?.parse().ok()?;
        let rank_byte: u8 = values.get("Rank")?.parse().ok()?;
        let origin_header = values
            .get("Origin header")
            .filter(|v| **v != "(None)")
            .map(|v| v.to_string());
        let ip = values.get("IP").and_then(|v| v.parse().ok());
        Some(WhoisRecord {
            player_id,
            connections,
            ip,
            origin_header,
            warning_level,
            rank: Rank::from_byte(rank_byte).unwrap_or(Rank::None),
        })
    }
}

/// A classified text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Info(String),
    Error(String),
    /// Nickname confirmation; carries the text after the `Nickname `
    /// prefix (`set to: 'nick'` or `reset.`).
    Nickname(String),
    Chat(ChatMessage),
    /// Echo of an outgoing `/tell`.
    TellPlayer(String),
    /// An incoming `/tell` from another player.
    TellClient { sender_id: i32, content: String },
    /// Response to `/ids`: the connected player ids.
    Ids(Vec<i32>),
    Whois(WhoisRecord),
}

/// Stateful line classifier. One instance per session; whois blocks are
/// accumulated across calls.
#[derive(Default)]
pub struct MessageClassifier {
    whois_buffer: Vec<String>,
}

impl MessageClassifier {
    pub fn new() -> Self {
        MessageClassifier::default()
    }

    /// Classifies one text frame. Returns `None` while a multiline block
    /// is still accumulating.
    pub fn classify(&mut self, text: &str) -> Option<ServerMessage> {
        if let Some(target) = text.strip_prefix(WHOIS_HEADER) {
            self.whois_buffer.clear();
            self.whois_buffer.push(target.to_string());
            return None;
        }
        if !self.whois_buffer.is_empty() {
            // Continuation lines carry a "-> " prefix; the rank line ends
            // the block.
            self.whois_buffer
                .push(text.get(3..).unwrap_or("").to_string());
            if text.starts_with("-> Rank") {
                let record = WhoisRecord::parse(&self.whois_buffer);
                self.whois_buffer.clear();
                if record.is_none() {
                    warn!("Discarding malformed whois block");
                }
                return record.map(ServerMessage::Whois);
            }
            return None;
        }

        if let Some(content) = text.strip_prefix("[Server] ") {
            return Some(ServerMessage::Info(content.to_string()));
        }
        if let Some(content) = text.strip_prefix("Server: ") {
            return Some(ServerMessage::Info(content.to_string()));
        }
        if let Some(content) = text.strip_prefix("Error: ") {
            return Some(ServerMessage::Error(content.to_string()));
        }
        if let Some(content) = text.strip_prefix("Nickname ") {
            return Some(ServerMessage::Nickname(content.to_string()));
        }
        if let Some(content) = text.strip_prefix("-> You tell ") {
            return Some(ServerMessage::TellPlayer(content.to_string()));
        }
        if let Some(content) = text.strip_prefix("Total: ") {
            return Some(ServerMessage::Ids(parse_ids(content)));
        }
        if text.starts_with('(')
            || text.starts_with('[')
            || text.chars().next().is_some_and(|c| c.is_ascii_digit())
        {
            return Some(parse_chat(text));
        }
        if let Some(message) = parse_tell_client(text) {
            return Some(message);
        }
        Some(ServerMessage::Info(text.to_string()))
    }
}

/// Splits a chat line at the first `": "` into sender header and content.
fn parse_chat(text: &str) -> ServerMessage {
    match text.split_once(": ") {
        Some((header, content)) => ServerMessage::Chat(ChatMessage {
            sender: ChatPlayer::parse_header(header),
            content: content.to_string(),
        }),
        None => ServerMessage::Info(text.to_string()),
    }
}

/// Matches `-> <id> tells you: <content>`.
fn parse_tell_client(text: &str) -> Option<ServerMessage> {
    let rest = text.strip_prefix("-> ")?;
    let (id_str, content) = rest.split_once(" tells you: ")?;
    let sender_id = id_str.parse().ok()?;
    Some(ServerMessage::TellClient {
        sender_id,
        content: content.to_string(),
    })
}

/// Parses `<count>; id, id, id` after the `Total: ` prefix.
fn parse_ids(content: &str) -> Vec<i32> {
    let list = content.split_once("; ").map(|(_, l)| l).unwrap_or("");
    list.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_prefixes() {
        let mut c = MessageClassifier::new();
        assert_eq!(
            c.classify("[Server] hello"),
            Some(ServerMessage::Info("hello".into()))
        );
        assert_eq!(
            c.classify("Server: restarting"),
            Some(ServerMessage::Info("restarting".into()))
        );
        assert_eq!(
            c.classify("This world has a password set."),
            Some(ServerMessage::Info("This world has a password set.".into()))
        );
    }

    #[test]
    fn test_error_and_nickname() {
        let mut c = MessageClassifier::new();
        assert_eq!(
            c.classify("Error: no permission"),
            Some(ServerMessage::Error("no permission".into()))
        );
        assert_eq!(
            c.classify("Nickname set to: 'pix'"),
            Some(ServerMessage::Nickname("set to: 'pix'".into()))
        );
    }

    #[test]
    fn test_chat_with_rank_header() {
        let mut c = MessageClassifier::new();
        let msg = c.classify("(M) gandalf: you shall not pass").unwrap();
        match msg {
            ServerMessage::Chat(chat) => {
                assert_eq!(chat.sender.rank, Rank::Moderator);
                assert_eq!(chat.sender.nickname.as_deref(), Some("gandalf"));
                assert_eq!(chat.content, "you shall not pass");
            }
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_header_shapes() {
        let id_nick = ChatPlayer::parse_header("[514] frodo");
        assert_eq!(id_nick.id, Some(514));
        assert_eq!(id_nick.nickname.as_deref(), Some("frodo"));

        let bare_id = ChatPlayer::parse_header("623");
        assert_eq!(bare_id.id, Some(623));
        assert_eq!(bare_id.nickname, None);
        assert_eq!(bare_id.display(), "623");

        let discord = ChatPlayer::parse_header("[D] sam");
        assert!(discord.is_discord);
        assert_eq!(discord.rank, Rank::None);
        assert_eq!(discord.nickname.as_deref(), Some("sam"));
    }

    #[test]
    fn test_tell_directions() {
        let mut c = MessageClassifier::new();
        assert_eq!(
            c.classify("-> You tell 55: hi"),
            Some(ServerMessage::TellPlayer("55: hi".into()))
        );
        assert_eq!(
            c.classify("-> 55 tells you: hello back"),
            Some(ServerMessage::TellClient {
                sender_id: 55,
                content: "hello back".into()
            })
        );
    }

    #[test]
    fn test_ids_listing() {
        let mut c = MessageClassifier::new();
        assert_eq!(
            c.classify("Total: 3; 100, 101, 105"),
            Some(ServerMessage::Ids(vec![100, 101, 105]))
        );
    }

    #[test]
    fn test_whois_block_accumulates() {
        let mut c = MessageClassifier::new();
        assert_eq!(c.classify("Client information for: 1337"), None);
        assert_eq!(c.classify("-> Connections by this IP: 2"), None);
        assert_eq!(c.classify("-> IP: 203.0.113.9"), None);
        assert_eq!(c.classify("-> Origin header: (None)"), None);
        assert_eq!(c.classify("-> Warning level: 1"), None);
        let result = c.classify("-> Rank: 2").unwrap();
        match result {
            ServerMessage::Whois(record) => {
                assert_eq!(record.player_id, 1337);
                assert_eq!(record.connections, 2);
                assert_eq!(record.ip, Some("203.0.113.9".parse().unwrap()));
                assert_eq!(record.origin_header, None);
                assert_eq!(record.warning_level, 1);
                assert_eq!(record.rank, Rank::Moderator);
            }
            other => panic!("expected whois, got {:?}", other),
        }
        // Classifier state is reset afterwards.
        assert_eq!(
            c.classify("Error: x"),
            Some(ServerMessage::Error("x".into()))
        );
    }

    #[test]
    fn test_malformed_whois_discarded() {
        let mut c = MessageClassifier::new();
        assert_eq!(c.classify("Client information for: not-a-number"), None);
        assert_eq!(c.classify("-> Rank: 1"), None);
    }
}
