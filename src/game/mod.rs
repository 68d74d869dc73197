//! Player, ball and score model
//!
//! [`GameContext`] is plain data guarded by the machine; the transitions that
//! mutate it live in [`events`] as methods on [`crate::Machine`].

pub mod events;
pub mod observer;

pub use observer::{Completion, CompletionBarrier, Observer};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::router::LampState;

pub const MAX_PLAYERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameState {
    #[default]
    Init,
    InProgress,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayerState {
    #[default]
    NoPlayer,
    Up,
    End,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameContext {
    pub game_state: GameState,
    pub player_state: PlayerState,
    /// 0 while no ball is in play
    pub ball_in_play: u32,
    /// 1-based; 0 means nobody is up
    pub current_player: u8,
    pub num_players: u8,
    pub max_players: u8,
    pub total_balls: u32,
    pub scores: [i32; MAX_PLAYERS],
    /// Points scored on the ball currently in play
    pub ball_score: i32,
    pub credits: i32,
    pub lamp_states: HashMap<u8, LampState>,
    pub test_mode: bool,
    pub quitting: bool,
}

impl GameContext {
    pub fn new(max_players: u8, total_balls: u32) -> Self {
        Self {
            game_state: GameState::Init,
            player_state: PlayerState::NoPlayer,
            ball_in_play: 0,
            current_player: 0,
            num_players: 0,
            max_players: max_players.min(MAX_PLAYERS as u8),
            total_balls,
            scores: [0; MAX_PLAYERS],
            ball_score: 0,
            credits: 0,
            lamp_states: HashMap::new(),
            test_mode: false,
            quitting: false,
        }
    }

    /// Score of a 1-based player, 0 for anyone out of range
    pub fn player_score(&self, player: u8) -> i32 {
        match usize::from(player).checked_sub(1) {
            Some(index) if index < MAX_PLAYERS => self.scores[index],
            _ => 0,
        }
    }

    pub fn lamp_state(&self, lamp_id: u8) -> LampState {
        self.lamp_states.get(&lamp_id).copied().unwrap_or_default()
    }

    pub fn stats(&self) -> GameStats {
        GameStats {
            player1_score: self.scores[0],
            player2_score: self.scores[1],
            player3_score: self.scores[2],
            player4_score: self.scores[3],
            match_number: 0,
            total_balls: self.total_balls,
            ball_in_play: self.ball_in_play,
            credits: self.credits,
            captured_at: Utc::now(),
        }
    }
}

/// Telemetry snapshot, serialized with the keys score boards consume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameStats {
    pub player1_score: i32,
    pub player2_score: i32,
    pub player3_score: i32,
    pub player4_score: i32,
    #[serde(rename = "Match")]
    pub match_number: u32,
    pub total_balls: u32,
    pub ball_in_play: u32,
    pub credits: i32,
    pub captured_at: DateTime<Utc>,
}

impl GameStats {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
