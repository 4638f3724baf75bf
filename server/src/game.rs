//! In-game state of one session: ball, touches, score, bots and timers.
//!
//! A `Match` exists only while its session is in game. All of it is mutated
//! from the session's single writer, both by the tick loop and by hit
//! commands, so it needs no synchronisation of its own.

use crate::bot::{BotAgent, BotTuning};
use crate::physics::BallPhysics;
use crate::rules::{RuleEngine, TouchVerdict};
use arena_shared::{
    ActionPayload, BallSnapshot, HitRequest, MemberId, PlayerMotion, ScoreEvent, ScoreReason,
    Team, TICK_MILLIS,
};
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

/// Pause between a point and the next serve.
pub const RESPAWN_DELAY: Duration = Duration::from_millis(1000);
/// Bots relay their movement every few ticks, like a throttled client.
pub const BOT_RELAY_INTERVAL_TICKS: u64 = 3;

/// Number of whole ticks covering `delay`.
pub fn ticks_for(delay: Duration) -> u64 {
    let millis = delay.as_millis() as u64;
    (millis + TICK_MILLIS - 1) / TICK_MILLIS
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    Ball(BallSnapshot),
    Score(ScoreEvent),
    PlayerMoved {
        player: MemberId,
        motion: PlayerMotion,
    },
    PlayerAction {
        player: MemberId,
        kind: String,
        payload: Option<ActionPayload>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HitOutcome {
    /// No live rally; the request changed nothing.
    Ignored,
    Applied,
    Violation(ScoreEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    RespawnBall,
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    due: u64,
    action: TimerAction,
}

pub struct Match {
    physics: BallPhysics,
    rules: RuleEngine,
    bots: Vec<BotAgent>,
    timers: Vec<Scheduled>,
    tick: u64,
    /// False between a point and the following respawn.
    rally_live: bool,
    rng: StdRng,
}

impl Match {
    /// Starts a match with a bot controller for every `(id, team)` given.
    pub fn new(bots: &[(MemberId, Team)], tuning: BotTuning, rng: StdRng) -> Self {
        Self::with_rules(bots, tuning, RuleEngine::new(), rng)
    }

    pub fn with_rules(
        bots: &[(MemberId, Team)],
        tuning: BotTuning,
        rules: RuleEngine,
        rng: StdRng,
    ) -> Self {
        Self {
            physics: BallPhysics::new(),
            rules,
            bots: bots
                .iter()
                .map(|&(id, team)| BotAgent::new(id, team, tuning))
                .collect(),
            timers: Vec::new(),
            tick: 0,
            rally_live: true,
            rng,
        }
    }

    pub fn physics(&self) -> &BallPhysics {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut BallPhysics {
        &mut self.physics
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn bots(&self) -> &[BotAgent] {
        &self.bots
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn rally_live(&self) -> bool {
        self.rally_live
    }

    pub fn winner(&self) -> Option<Team> {
        self.rules.winner()
    }

    /// Applies a hit from a human or a bot. The touch rule is checked before
    /// the ball is moved.
    pub fn hit_ball(&mut self, player: MemberId, team: Team, hit: &HitRequest) -> HitOutcome {
        if !self.rally_live || self.winner().is_some() {
            return HitOutcome::Ignored;
        }

        match self.rules.register_touch(player, team) {
            TouchVerdict::Allowed => {
                self.physics.apply_hit(hit);
                HitOutcome::Applied
            }
            TouchVerdict::Violation(event) => {
                debug!("Team {} touched the ball four times", team);
                self.end_rally();
                match event {
                    Some(event) => HitOutcome::Violation(event),
                    None => HitOutcome::Ignored,
                }
            }
        }
    }

    /// Advances the match by one fixed tick.
    pub fn tick(&mut self) -> Vec<MatchEvent> {
        if self.winner().is_some() {
            return Vec::new();
        }

        self.tick += 1;
        self.run_timers();

        let mut events = Vec::new();
        let outcome = self.physics.step();
        events.push(MatchEvent::Ball(self.physics.snapshot()));

        if let Some(side) = outcome.landed {
            if self.rally_live {
                let scorer = side.defender().opponent();
                self.end_rally();
                if let Some(event) = self.rules.award_point(scorer, ScoreReason::BallLanded) {
                    events.push(MatchEvent::Score(event));
                }
            }
        }
        if outcome.crossed_net {
            self.rules.net_crossed();
        }

        if self.winner().is_none() {
            self.run_bots(&mut events);
        }

        events
    }

    fn run_bots(&mut self, events: &mut Vec<MatchEvent>) {
        for index in 0..self.bots.len() {
            let ball = self.physics.snapshot();
            let intent = self.bots[index].update(&ball, self.tick, &mut self.rng);
            let (id, team) = (self.bots[index].id, self.bots[index].team);

            if intent.jumped {
                events.push(MatchEvent::PlayerAction {
                    player: id,
                    kind: "jump".to_string(),
                    payload: None,
                });
            }

            if let Some(hit) = intent.hit {
                let outcome = self.hit_ball(id, team, &hit);
                if outcome != HitOutcome::Ignored {
                    events.push(MatchEvent::PlayerAction {
                        player: id,
                        kind: hit.power.as_str().to_string(),
                        payload: Some(ActionPayload {
                            direction: hit.direction,
                            gauge: hit.gauge,
                        }),
                    });
                }
                if let HitOutcome::Violation(event) = outcome {
                    events.push(MatchEvent::Score(event));
                    if self.winner().is_some() {
                        return;
                    }
                }
            }

            if self.tick % BOT_RELAY_INTERVAL_TICKS == 0 {
                events.push(MatchEvent::PlayerMoved {
                    player: id,
                    motion: self.bots[index].motion(),
                });
            }
        }
    }

    /// Kills the rally and, unless the game is over, schedules the next serve.
    fn end_rally(&mut self) {
        self.rally_live = false;
        if self.winner().is_none() {
            self.timers.push(Scheduled {
                due: self.tick + ticks_for(RESPAWN_DELAY),
                action: TimerAction::RespawnBall,
            });
        }
    }

    fn run_timers(&mut self) {
        let now = self.tick;
        let (due, pending): (Vec<Scheduled>, Vec<Scheduled>) =
            self.timers.drain(..).partition(|timer| timer.due <= now);
        self.timers = pending;

        for timer in due {
            match timer.action {
                TimerAction::RespawnBall => {
                    let drift = self.rng.gen_range(-2.0..2.0);
                    self.physics.respawn(drift);
                    self.rules.net_crossed();
                    self.rally_live = true;
                }
            }
        }
    }
}
