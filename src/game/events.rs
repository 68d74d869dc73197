//! Game and player state transitions
//!
//! Context locks are taken for the mutation only and released before any
//! command is queued or observer awaited, so observers may call back into the
//! machine freely.

use futures_util::future::{BoxFuture, FutureExt};

use super::{GameState, PlayerState, MAX_PLAYERS};
use crate::display::{DisplayTarget, BLANK_SCORE};
use crate::machine::Machine;

enum Turn {
    Ignored,
    Up { player: u8, ball: u32 },
    GameOver,
}

impl Machine {
    /// Move the game to `new_state`; false when nothing changed
    pub fn change_game_state(&self, new_state: GameState) -> BoxFuture<'_, bool> {
        async move {
            let previous = {
                let mut ctx = self.context();
                if ctx.test_mode || ctx.game_state == new_state {
                    return false;
                }
                let previous = ctx.game_state;
                ctx.game_state = new_state;
                previous
            };

            log::debug!("Game state {:?} -> {:?}", previous, new_state);
            match new_state {
                GameState::InProgress => self.game_start(previous).await,
                GameState::Ended => self.game_over().await,
                GameState::Init => {}
            }
            true
        }
        .boxed()
    }

    /// Move the current player to `new_state`; false when nothing changed
    pub fn change_player_state(&self, new_state: PlayerState) -> BoxFuture<'_, bool> {
        async move {
            {
                let mut ctx = self.context();
                if ctx.test_mode || ctx.player_state == new_state {
                    return false;
                }
                ctx.player_state = new_state;
            }

            match new_state {
                PlayerState::Up => self.player_up().await,
                PlayerState::End => self.player_end().await,
                PlayerState::Finished => self.player_finish().await,
                PlayerState::NoPlayer => {}
            }
            true
        }
        .boxed()
    }

    async fn game_start(&self, previous: GameState) {
        log::debug!("GameStart");
        let players = {
            let mut ctx = self.context();
            ctx.ball_in_play = 0;
            ctx.current_player = 0;
            ctx.ball_score = 0;
            // players added before the first game count; a new game starts empty
            if previous == GameState::Ended {
                ctx.num_players = 0;
            }
            ctx.num_players
        };

        self.clear_scores().await;
        for player in 1..=players {
            self.router().show_display(player, true).await;
        }

        for observer in self.observers() {
            observer.game_start(self).await;
        }
    }

    async fn game_over(&self) {
        log::debug!("GameOver");
        self.router().set_ball_in_play(BLANK_SCORE).await;
        {
            let mut ctx = self.context();
            ctx.ball_in_play = 0;
            ctx.current_player = 0;
        }

        for observer in self.observers() {
            observer.game_over(self).await;
        }

        self.change_player_state(PlayerState::NoPlayer).await;
    }

    /// Put the next player (and, after the last player, the next ball) up.
    /// Ends the game once every player has played the last ball.
    pub async fn player_up(&self) {
        let turn = {
            let mut ctx = self.context();
            if ctx.game_state != GameState::InProgress {
                log::warn!("PlayerUp called, but game is not started");
                Turn::Ignored
            } else if ctx.test_mode {
                Turn::Ignored
            } else if ctx.num_players == 0 {
                log::warn!("PlayerUp called with no players added");
                Turn::Ignored
            } else {
                ctx.ball_score = 0;
                let next_turn = if ctx.ball_in_play == 0 {
                    ctx.ball_in_play = 1;
                    ctx.current_player = 1;
                    true
                } else if ctx.current_player < ctx.num_players {
                    ctx.current_player += 1;
                    true
                } else if ctx.ball_in_play < ctx.total_balls {
                    ctx.ball_in_play += 1;
                    ctx.current_player = 1;
                    true
                } else {
                    false
                };

                if next_turn {
                    Turn::Up {
                        player: ctx.current_player,
                        ball: ctx.ball_in_play,
                    }
                } else {
                    Turn::GameOver
                }
            }
        };

        let (player, ball) = match turn {
            Turn::Ignored => return,
            Turn::GameOver => {
                log::debug!("Last ball played; ending game");
                self.change_game_state(GameState::Ended).await;
                return;
            }
            Turn::Up { player, ball } => (player, ball),
        };
        log::debug!("PlayerUp: player {} ball {}", player, ball);

        self.router().set_ball_in_play(ball as i32).await;
        if ball == 1 {
            for observer in self.observers() {
                observer.player_start(self, player).await;
            }
        }
        for observer in self.observers() {
            observer.player_up(self, player).await;
        }
    }

    /// Notify every observer that the ball ended, then advance to the next
    /// turn in the background once all of them have completed
    pub async fn player_end(&self) {
        let player = {
            let ctx = self.context();
            if ctx.test_mode {
                return;
            }
            ctx.current_player
        };

        let barrier = super::CompletionBarrier::new();
        for observer in self.observers() {
            observer.player_end(self, player, barrier.token()).await;
        }

        let machine = self.clone();
        let limit = self.config().player_end_timeout();
        tokio::spawn(async move {
            if !barrier.wait(limit).await {
                log::warn!("Player end observers did not complete within {:?}; advancing", limit);
            }
            if machine.is_quitting() {
                return;
            }
            machine.change_player_state(PlayerState::Up).await;
        });
    }

    pub async fn player_finish(&self) {
        let player = {
            let ctx = self.context();
            if ctx.test_mode {
                return;
            }
            ctx.current_player
        };
        log::debug!("PlayerFinish: player {}", player);

        for observer in self.observers() {
            observer.player_finish(self, player).await;
        }
    }

    pub async fn ball_drained(&self) {
        if self.is_test_mode() {
            return;
        }
        log::debug!("BallDrained");

        for observer in self.observers() {
            observer.ball_drained(self).await;
        }
    }

    /// Add a player; only allowed while on the first ball
    pub async fn add_player(&self) {
        let added = {
            let mut ctx = self.context();
            if ctx.test_mode || ctx.ball_in_play > 1 || ctx.num_players >= ctx.max_players {
                None
            } else {
                ctx.num_players += 1;
                Some(ctx.num_players)
            }
        };

        let Some(player) = added else { return };
        log::debug!("AddPlayer: now {} player(s)", player);

        self.router().show_display(player, true).await;
        for observer in self.observers() {
            observer.player_added(self, player).await;
        }
    }

    /// Credit the player who is up; nothing happens while nobody is
    pub async fn add_score(&self, points: i32) {
        let update = {
            let mut ctx = self.context();
            let player = ctx.current_player;
            if player < 1 {
                None
            } else {
                let index = usize::from(player - 1);
                ctx.scores[index] = ctx.scores[index].saturating_add(points);
                ctx.ball_score = ctx.ball_score.saturating_add(points);
                log::debug!("BallScore = {}, total = {}", ctx.ball_score, ctx.scores[index]);
                Some((player, ctx.scores[index]))
            }
        };

        if let Some((player, total)) = update {
            self.router().set_display(DisplayTarget::Player(player), total).await;
        }
    }

    /// Zero every score and blank every player display
    pub async fn clear_scores(&self) {
        self.context().scores = [0; MAX_PLAYERS];
        for player in 1..=MAX_PLAYERS as u8 {
            self.router().show_display(player, false).await;
        }
    }
}
