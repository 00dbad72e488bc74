//! Object classes emitted by the spatial detectors.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

/// Domain concept a detected box refers to.
///
/// Detector class ids are mapped onto these variants once, at the model
/// boundary; everything downstream switches on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObjectLabel {
    Ball,
    Spike,
    Block,
    Set,
    Receive,
    Serve,
    Player,
}

impl ObjectLabel {
    /// Labels produced by the action detector.
    pub const ACTIONS: [ObjectLabel; 5] = [
        ObjectLabel::Spike,
        ObjectLabel::Block,
        ObjectLabel::Set,
        ObjectLabel::Receive,
        ObjectLabel::Serve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectLabel::Ball => "ball",
            ObjectLabel::Spike => "spike",
            ObjectLabel::Block => "block",
            ObjectLabel::Set => "set",
            ObjectLabel::Receive => "receive",
            ObjectLabel::Serve => "serve",
            ObjectLabel::Player => "player",
        }
    }

    /// True for the action detector's classes.
    pub fn is_action(&self) -> bool {
        Self::ACTIONS.contains(self)
    }
}

impl fmt::Display for ObjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ObjectLabel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ball" => Ok(ObjectLabel::Ball),
            "spike" => Ok(ObjectLabel::Spike),
            "block" => Ok(ObjectLabel::Block),
            "set" => Ok(ObjectLabel::Set),
            "receive" => Ok(ObjectLabel::Receive),
            "serve" => Ok(ObjectLabel::Serve),
            "player" | "person" => Ok(ObjectLabel::Player),
            other => Err(ModelError::UnknownLabel(other.to_string())),
        }
    }
}
