//! Player roster types and the client's own identity.

use protocol::{Color, Position};

/// A player's permission rank within a world. Ordered: higher ranks can
/// do everything lower ranks can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Rank {
    #[default]
    None,
    Player,
    Moderator,
    Admin,
}

impl Rank {
    pub fn from_byte(byte: u8) -> Option<Rank> {
        match byte {
            0 => Some(Rank::None),
            1 => Some(Rank::Player),
            2 => Some(Rank::Moderator),
            3 => Some(Rank::Admin),
            _ => None,
        }
    }

    /// Parses a chat-header rank marker; anything but `M`/`A` means an
    /// unranked sender.
    pub fn from_prefix(c: char) -> Rank {
        match c {
            'M' => Rank::Moderator,
            'A' => Rank::Admin,
            _ => Rank::None,
        }
    }

    /// Longest chat message the server accepts from this rank.
    pub fn max_message_len(self) -> usize {
        match self {
            Rank::Moderator => 512,
            Rank::Admin => 16384,
            _ => 128,
        }
    }
}

/// A player's selected tool. Unknown bytes fall back to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerTool {
    #[default]
    Cursor,
    Move,
    Pipette,
    /// Moderator-only. Fills an entire chunk with one color.
    Eraser,
    Zoom,
    Fill,
    /// Moderator-only.
    Paste,
    Export,
    Line,
    /// Moderator-only.
    Protect,
    /// Moderator-only.
    Copy,
    /// Moderator-only.
    AreaProtect,
}

impl PlayerTool {
    pub fn from_byte(byte: u8) -> PlayerTool {
        match byte {
            1 => PlayerTool::Move,
            2 => PlayerTool::Pipette,
            3 => PlayerTool::Eraser,
            4 => PlayerTool::Zoom,
            5 => PlayerTool::Fill,
            6 => PlayerTool::Paste,
            7 => PlayerTool::Export,
            8 => PlayerTool::Line,
            9 => PlayerTool::Protect,
            10 => PlayerTool::Copy,
            11 => PlayerTool::AreaProtect,
            _ => PlayerTool::Cursor,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PlayerTool::Cursor => 0,
            PlayerTool::Move => 1,
            PlayerTool::Pipette => 2,
            PlayerTool::Eraser => 3,
            PlayerTool::Zoom => 4,
            PlayerTool::Fill => 5,
            PlayerTool::Paste => 6,
            PlayerTool::Export => 7,
            PlayerTool::Line => 8,
            PlayerTool::Protect => 9,
            PlayerTool::Copy => 10,
            PlayerTool::AreaProtect => 11,
        }
    }
}

/// One connected player as mirrored from world updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Player {
    pub id: i32,
    /// Sub-pixel wire position.
    pub raw_pos: Position,
    pub color: Color,
    pub tool: PlayerTool,
}

impl Player {
    pub fn new(id: i32) -> Self {
        Player {
            id,
            raw_pos: Position::default(),
            color: Color::default(),
            tool: PlayerTool::default(),
        }
    }

    /// Whole-pixel canvas position.
    pub fn pos(&self) -> Position {
        self.raw_pos.to_canvas()
    }
}

/// The client's own identity within the session.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub player: Option<Player>,
    pub rank: Rank,
    pub nickname: Option<String>,
}

impl ClientState {
    pub fn id(&self) -> Option<i32> {
        self.player.as_ref().map(|p| p.id)
    }
}
