//! Server-driven players that fill empty slots.
//!
//! A bot decides on a coarse cadence (every `reaction_ticks`) and moves every
//! tick with the same body kinematics a human client uses. It never touches
//! the ball directly: an attempted hit is returned as a [`HitRequest`] and
//! goes through the same touch check as human input.

use crate::physics::{Side, Vector2};
use arena_shared::{
    BallSnapshot, HitKind, HitRequest, MemberId, PlayerMotion, Team, BALL_RADIUS, COURT_WIDTH,
    FLOOR_Y, GRAVITY, JUMP_VELOCITY, NET_RESTITUTION, NET_TOP_Y, NET_WIDTH, NET_X, PLAYER_GRAVITY,
    PLAYER_GROUND_Y, PLAYER_HEIGHT, PLAYER_SPEED, PLAYER_WIDTH, TICK_MILLIS, WALL_RESTITUTION,
};
use rand::Rng;
use std::time::Duration;

/// Distance from the target under which a bot stops walking.
const ARRIVAL_TOLERANCE: f32 = 5.0;
/// Balls lower on screen than this are worth spiking.
const SPIKE_HEIGHT_Y: f32 = 200.0;
const MISTAKE_WANDER: f32 = 100.0;

/// Skill settings shared by every bot on the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotTuning {
    pub reaction_ticks: u64,
    pub prediction_accuracy: f32,
    pub mistake_probability: f32,
    pub hit_radius: f32,
    pub action_cooldown_ticks: u64,
    pub prediction_steps: usize,
}

impl Default for BotTuning {
    fn default() -> Self {
        Self {
            reaction_ticks: 9,
            prediction_accuracy: 0.85,
            mistake_probability: 0.10,
            hit_radius: 80.0,
            action_cooldown_ticks: 25,
            prediction_steps: 200,
        }
    }
}

impl BotTuning {
    /// Default tuning with the decision cadence given as wall-clock time.
    pub fn from_reaction(reaction: Duration) -> Self {
        let ticks = reaction.as_millis() as u64 / TICK_MILLIS;
        Self {
            reaction_ticks: ticks.max(1),
            ..Self::default()
        }
    }
}

/// Horizontal range a bot may occupy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CourtBounds {
    pub left: f32,
    pub right: f32,
}

impl CourtBounds {
    pub fn for_team(team: Team) -> Self {
        match team {
            Team::A => CourtBounds {
                left: 10.0,
                right: NET_X - 10.0,
            },
            Team::B => CourtBounds {
                left: NET_X + 10.0,
                right: COURT_WIDTH - 10.0,
            },
        }
    }

    pub fn center(&self) -> f32 {
        (self.left + self.right) / 2.0
    }

    pub fn clamp_target(&self, x: f32) -> f32 {
        x.clamp(self.left, self.right)
    }

    /// Clamp for the body's left edge, which must keep the whole body inside.
    pub fn clamp_body(&self, x: f32) -> f32 {
        x.clamp(self.left, self.right - PLAYER_WIDTH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandingPrediction {
    pub x: f32,
    pub on_own_side: bool,
}

/// What a bot wants to happen this tick besides its own movement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BotIntent {
    pub jumped: bool,
    pub hit: Option<HitRequest>,
}

#[derive(Debug, Clone)]
pub struct BotAgent {
    pub id: MemberId,
    pub team: Team,
    pub position: Vector2,
    pub velocity: Vector2,
    pub grounded: bool,
    pub facing_right: bool,
    pub target_x: f32,
    pub court: CourtBounds,
    last_decision_tick: Option<u64>,
    last_action_tick: Option<u64>,
    tuning: BotTuning,
}

impl BotAgent {
    pub fn new(id: MemberId, team: Team, tuning: BotTuning) -> Self {
        let court = CourtBounds::for_team(team);
        let x = court.center();
        Self {
            id,
            team,
            position: Vector2::new(x, PLAYER_GROUND_Y),
            velocity: Vector2::default(),
            grounded: true,
            facing_right: team == Team::A,
            target_x: x,
            court,
            last_decision_tick: None,
            last_action_tick: None,
            tuning,
        }
    }

    pub fn motion(&self) -> PlayerMotion {
        PlayerMotion {
            x: self.position.x,
            y: self.position.y,
            vel_x: self.velocity.x,
            vel_y: self.velocity.y,
            facing_right: self.facing_right,
            grounded: self.grounded,
        }
    }

    fn owns(&self, x: f32) -> bool {
        Side::of(x).defender() == self.team
    }

    pub fn distance_to(&self, ball: &BallSnapshot) -> f32 {
        Vector2::new(
            ball.x - (self.position.x + PLAYER_WIDTH / 2.0),
            ball.y - (self.position.y + PLAYER_HEIGHT / 2.0),
        )
        .magnitude()
    }

    /// Forward-simulates the ball at reduced fidelity (no drag, a coarse net)
    /// and returns where it will touch the floor, if it stays on this side.
    pub fn predict_landing<R: Rng + ?Sized>(
        &self,
        ball: &BallSnapshot,
        rng: &mut R,
    ) -> Option<LandingPrediction> {
        let mut position = Vector2::new(ball.x, ball.y);
        let mut velocity = Vector2::new(ball.vel_x, ball.vel_y);
        let net_reach = NET_WIDTH / 2.0 + BALL_RADIUS;

        for _ in 0..self.tuning.prediction_steps {
            velocity.y += GRAVITY;
            position = position.add(&velocity);

            if position.y + BALL_RADIUS >= FLOOR_Y {
                let spread = (1.0 - self.tuning.prediction_accuracy) * 100.0;
                let error = spread * (rng.gen::<f32>() - 0.5);
                return Some(LandingPrediction {
                    x: position.x + error,
                    on_own_side: self.owns(position.x),
                });
            }

            if position.y + BALL_RADIUS > NET_TOP_Y && (position.x - NET_X).abs() < net_reach {
                position.x = if velocity.x > 0.0 {
                    NET_X - net_reach
                } else {
                    NET_X + net_reach
                };
                velocity.x *= -NET_RESTITUTION;
            }

            let heading_over = (velocity.x > 0.0 && position.x >= NET_X)
                || (velocity.x < 0.0 && position.x <= NET_X);
            if heading_over && !self.owns(position.x) {
                return None;
            }

            if position.x < 0.0 || position.x > COURT_WIDTH {
                velocity.x *= -WALL_RESTITUTION;
                position.x = position.x.clamp(0.0, COURT_WIDTH);
            }
        }

        None
    }

    /// Runs one tick: a decision when the reaction timer allows it, then
    /// movement towards the current target.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        ball: &BallSnapshot,
        tick: u64,
        rng: &mut R,
    ) -> BotIntent {
        let mut intent = BotIntent::default();

        let due = self
            .last_decision_tick
            .map_or(true, |last| tick.saturating_sub(last) >= self.tuning.reaction_ticks);

        if due {
            self.last_decision_tick = Some(tick);

            if rng.gen::<f32>() < self.tuning.mistake_probability {
                if rng.gen::<f32>() < 0.5 {
                    let wander = (rng.gen::<f32>() - 0.5) * MISTAKE_WANDER;
                    self.target_x = self.court.clamp_target(self.position.x + wander);
                }
            } else if self.owns(ball.x) {
                let target = match self.predict_landing(ball, rng) {
                    Some(prediction) if prediction.on_own_side => prediction.x,
                    _ => ball.x,
                };
                self.target_x = self.court.clamp_target(target);

                let cooled = self.last_action_tick.map_or(true, |last| {
                    tick.saturating_sub(last) > self.tuning.action_cooldown_ticks
                });
                if cooled && self.distance_to(ball) < self.tuning.hit_radius {
                    intent = self.attempt_hit(ball, tick, rng);
                }
            } else {
                self.target_x = self.court.center();
            }
        }

        self.step_movement();
        intent
    }

    fn attempt_hit<R: Rng + ?Sized>(
        &mut self,
        ball: &BallSnapshot,
        tick: u64,
        rng: &mut R,
    ) -> BotIntent {
        self.last_action_tick = Some(tick);

        let jumped = self.grounded;
        if jumped {
            self.velocity.y = JUMP_VELOCITY;
            self.grounded = false;
        }

        let spike = ball.y > SPIKE_HEIGHT_Y && rng.gen::<f32>() > 0.3;
        let (power, gauge) = if spike {
            (HitKind::Spike, 60.0 + rng.gen::<f32>() * 20.0)
        } else {
            (HitKind::Toss, 0.0)
        };

        BotIntent {
            jumped,
            hit: Some(HitRequest {
                power,
                direction: if self.facing_right { 1.0 } else { -1.0 },
                gauge,
            }),
        }
    }

    fn step_movement(&mut self) {
        let diff = self.target_x - self.position.x;
        if diff.abs() > ARRIVAL_TOLERANCE {
            self.velocity.x = PLAYER_SPEED * diff.signum();
            self.facing_right = diff > 0.0;
        } else {
            self.velocity.x = 0.0;
        }

        if !self.grounded {
            self.velocity.y += PLAYER_GRAVITY;
        }

        self.position = self.position.add(&self.velocity);

        if self.position.y >= PLAYER_GROUND_Y {
            self.position.y = PLAYER_GROUND_Y;
            self.velocity.y = 0.0;
            self.grounded = true;
        }

        self.position.x = self.court.clamp_body(self.position.x);
    }
}
