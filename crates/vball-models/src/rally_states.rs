//! Run-length encoding of per-frame game states.

use serde::{Deserialize, Serialize};

use crate::game_state::GameState;

/// A run of consecutive frames sharing one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(GameState, u32)", into = "(GameState, u32)")]
pub struct StateRun {
    pub state: GameState,
    pub count: u32,
}

impl From<(GameState, u32)> for StateRun {
    fn from((state, count): (GameState, u32)) -> Self {
        Self { state, count }
    }
}

impl From<StateRun> for (GameState, u32) {
    fn from(run: StateRun) -> Self {
        (run.state, run.count)
    }
}

/// Compact per-frame state sequence of a rally.
///
/// Serializes as `[[code, count], ...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RallyStates(Vec<StateRun>);

impl RallyStates {
    /// Encode a label sequence.
    pub fn encode(labels: &[GameState]) -> Self {
        let mut runs: Vec<StateRun> = Vec::new();
        for &state in labels {
            match runs.last_mut() {
                Some(run) if run.state == state => run.count += 1,
                _ => runs.push(StateRun { state, count: 1 }),
            }
        }
        Self(runs)
    }

    /// Expand back into one label per frame.
    pub fn decode(&self) -> Vec<GameState> {
        let mut labels = Vec::with_capacity(self.frame_count());
        for run in &self.0 {
            labels.extend(std::iter::repeat(run.state).take(run.count as usize));
        }
        labels
    }

    /// Number of frames covered.
    pub fn frame_count(&self) -> usize {
        self.0.iter().map(|r| r.count as usize).sum()
    }

    /// State at a frame offset, if within range.
    pub fn state_at(&self, offset: usize) -> Option<GameState> {
        let mut remaining = offset;
        for run in &self.0 {
            let count = run.count as usize;
            if remaining < count {
                return Some(run.state);
            }
            remaining -= count;
        }
        None
    }

    /// Offset of the last frame labeled with `state`.
    pub fn last_offset_of(&self, state: GameState) -> Option<usize> {
        let mut end = 0usize;
        let mut last = None;
        for run in &self.0 {
            end += run.count as usize;
            if run.state == state && run.count > 0 {
                last = Some(end - 1);
            }
        }
        last
    }

    pub fn runs(&self) -> &[StateRun] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize to the TEXT column form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".to_string())
    }

    /// Parse the TEXT column form.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Encode a label sequence as runs.
pub fn run_length_encode(labels: &[GameState]) -> RallyStates {
    RallyStates::encode(labels)
}

/// Expand runs into a label sequence.
pub fn run_length_decode(states: &RallyStates) -> Vec<GameState> {
    states.decode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use GameState::*;

    #[test]
    fn test_round_trip() {
        let samples: Vec<Vec<GameState>> = vec![
            vec![],
            vec![Play],
            vec![Service, Service, Play, Play, Play, NoPlay],
            vec![NoPlay, Service, NoPlay, Service, Play],
        ];
        for labels in samples {
            assert_eq!(run_length_decode(&run_length_encode(&labels)), labels);
        }
    }

    #[test]
    fn test_runs_merge_adjacent_labels() {
        let mut labels = vec![Service; 30];
        labels.extend(vec![NoPlay; 60]);
        let states = RallyStates::encode(&labels);
        assert_eq!(states.runs().len(), 2);
        assert_eq!(states.frame_count(), 90);
        assert_eq!(states.to_json(), "[[1,30],[3,60]]");
    }

    #[test]
    fn test_state_lookup() {
        let states = RallyStates::encode(&[Service, Service, Play, NoPlay]);
        assert_eq!(states.state_at(1), Some(Service));
        assert_eq!(states.state_at(2), Some(Play));
        assert_eq!(states.state_at(4), None);
        assert_eq!(states.last_offset_of(Service), Some(1));
        assert_eq!(states.last_offset_of(Play), Some(2));
    }

    #[test]
    fn test_json_parse() {
        let states = RallyStates::from_json("[[1,2],[2,3]]").unwrap();
        assert_eq!(states.decode(), vec![Service, Service, Play, Play, Play]);
        assert!(RallyStates::from_json("[[9,1]]").is_err());
    }
}
