/// Single-byte opcode leading every binary server frame.
///
/// Unknown opcode bytes decode to `None` and are ignored by the
/// dispatcher; they are never a connection-fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Assigns the client player's id; completes the handshake.
    SetId,
    /// Batched player, pixel, and disconnect updates.
    WorldUpdate,
    /// A compressed chunk payload.
    ChunkLoad,
    /// Repositions the client player.
    Teleport,
    /// Updates the client player's permission rank.
    SetRank,
    /// Captcha verification status change.
    Captcha,
    /// Assigns the pixel bucket's capacity and fill time.
    SetPixelQuota,
    /// Toggles a chunk's protection flag.
    ChunkProtect,
    /// The world's player connection cap.
    MaxPlayerCount,
    /// Remaining donation boost duration.
    DonationTimer,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Some(match byte {
            0 => Opcode::SetId,
            1 => Opcode::WorldUpdate,
            2 => Opcode::ChunkLoad,
            3 => Opcode::Teleport,
            4 => Opcode::SetRank,
            5 => Opcode::Captcha,
            6 => Opcode::SetPixelQuota,
            7 => Opcode::ChunkProtect,
            8 => Opcode::MaxPlayerCount,
            9 => Opcode::DonationTimer,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Captcha verification states carried by [`Opcode::Captcha`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaState {
    Waiting,
    Verifying,
    Verified,
    Ok,
    Invalid,
}

impl CaptchaState {
    pub fn from_byte(byte: u8) -> Option<CaptchaState> {
        Some(match byte {
            0 => CaptchaState::Waiting,
            1 => CaptchaState::Verifying,
            2 => CaptchaState::Verified,
            3 => CaptchaState::Ok,
            4 => CaptchaState::Invalid,
            _ => return None,
        })
    }
}
