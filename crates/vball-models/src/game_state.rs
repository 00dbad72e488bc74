//! Game state labels produced by the window classifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

/// State of play assigned to a window of frames.
///
/// The numeric codes are part of the persisted `rally_states` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GameState {
    /// A player is serving
    Service = 1,
    /// The ball is in play
    Play = 2,
    /// Dead ball, timeouts, replays
    NoPlay = 3,
}

impl GameState {
    /// All states in code order.
    pub const ALL: [GameState; 3] = [GameState::Service, GameState::Play, GameState::NoPlay];

    /// Persisted numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a persisted numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(GameState::Service),
            2 => Some(GameState::Play),
            3 => Some(GameState::NoPlay),
            _ => None,
        }
    }

    /// Configuration name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameState::Service => "service",
            GameState::Play => "play",
            GameState::NoPlay => "no_play",
        }
    }

    /// Text drawn on rally clips.
    pub fn overlay_text(&self) -> &'static str {
        match self {
            GameState::Service => "SERVICE",
            GameState::Play => "PLAY",
            GameState::NoPlay => "NO-PLAY",
        }
    }

    /// Overlay colour, as understood by ffmpeg's `drawtext`.
    pub fn overlay_color(&self) -> &'static str {
        match self {
            GameState::Service => "green",
            GameState::Play => "yellow",
            GameState::NoPlay => "red",
        }
    }

    /// True for states that belong to a live rally.
    pub fn is_live(&self) -> bool {
        matches!(self, GameState::Service | GameState::Play)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<GameState> for u8 {
    fn from(state: GameState) -> Self {
        state.code()
    }
}

impl TryFrom<u8> for GameState {
    type Error = ModelError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        GameState::from_code(code).ok_or(ModelError::InvalidStateCode(code))
    }
}

impl FromStr for GameState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "service" => Ok(GameState::Service),
            "play" => Ok(GameState::Play),
            "no_play" | "noplay" => Ok(GameState::NoPlay),
            other => Err(ModelError::UnknownState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(GameState::Service.code(), 1);
        assert_eq!(GameState::Play.code(), 2);
        assert_eq!(GameState::NoPlay.code(), 3);
        assert_eq!(GameState::from_code(4), None);
    }

    #[test]
    fn test_serde_uses_codes() {
        let json = serde_json::to_string(&GameState::NoPlay).unwrap();
        assert_eq!(json, "3");
        let state: GameState = serde_json::from_str("1").unwrap();
        assert_eq!(state, GameState::Service);
        assert!(serde_json::from_str::<GameState>("0").is_err());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("SERVICE".parse::<GameState>().unwrap(), GameState::Service);
        assert_eq!("no-play".parse::<GameState>().unwrap(), GameState::NoPlay);
        assert!("timeout".parse::<GameState>().is_err());
    }
}
