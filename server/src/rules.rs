//! Touch counting and scoring.

use arena_shared::{MemberId, Score, ScoreEvent, ScoreReason, Team, WINNING_SCORE};

/// Maximum consecutive touches a team may make before the ball must cross.
pub const MAX_TOUCHES: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchState {
    pub last_team: Option<Team>,
    pub count: u8,
    pub last_player: Option<MemberId>,
}

/// Result of checking a hit against the touch rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchVerdict {
    Allowed,
    /// The hit was one touch too many. Carries the point for the opponent,
    /// or `None` when the game was already decided.
    Violation(Option<ScoreEvent>),
}

#[derive(Debug, Clone)]
pub struct RuleEngine {
    touches: TouchState,
    score: Score,
    winner: Option<Team>,
    winning_score: u32,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::with_winning_score(WINNING_SCORE)
    }

    pub fn with_winning_score(winning_score: u32) -> Self {
        Self {
            touches: TouchState::default(),
            score: Score::default(),
            winner: None,
            winning_score,
        }
    }

    pub fn touches(&self) -> &TouchState {
        &self.touches
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn winner(&self) -> Option<Team> {
        self.winner
    }

    /// Counts a touch by `player` of `team`.
    pub fn register_touch(&mut self, player: MemberId, team: Team) -> TouchVerdict {
        if self.touches.last_team == Some(team) {
            self.touches.count += 1;
            if self.touches.count > MAX_TOUCHES {
                self.touches = TouchState::default();
                let event = self.award_point(team.opponent(), ScoreReason::ThreeTouchViolation);
                return TouchVerdict::Violation(event);
            }
        } else {
            self.touches.last_team = Some(team);
            self.touches.count = 1;
        }
        self.touches.last_player = Some(player);
        TouchVerdict::Allowed
    }

    pub fn net_crossed(&mut self) {
        self.touches = TouchState::default();
    }

    /// Awards one point. Returns `None` once a winner exists, so the game can
    /// only be decided once.
    pub fn award_point(&mut self, team: Team, reason: ScoreReason) -> Option<ScoreEvent> {
        if self.winner.is_some() {
            return None;
        }

        self.score.increment(team);
        self.touches = TouchState::default();
        self.winner = self.score.leader_at(self.winning_score);

        Some(ScoreEvent {
            score: self.score,
            reason,
            scoring_team: team,
            game_end: self.winner.is_some(),
            winner: self.winner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_touch_starts_count() {
        let mut rules = RuleEngine::new();
        assert_eq!(rules.register_touch(1, Team::A), TouchVerdict::Allowed);
        assert_eq!(
            *rules.touches(),
            TouchState {
                last_team: Some(Team::A),
                count: 1,
                last_player: Some(1),
            }
        );
    }

    #[test]
    fn test_fourth_touch_is_violation() {
        let mut rules = RuleEngine::new();
        for _ in 0..3 {
            assert_eq!(rules.register_touch(1, Team::A), TouchVerdict::Allowed);
        }

        match rules.register_touch(2, Team::A) {
            TouchVerdict::Violation(Some(event)) => {
                assert_eq!(event.scoring_team, Team::B);
                assert_eq!(event.reason, ScoreReason::ThreeTouchViolation);
                assert_eq!(event.score, Score { team_a: 0, team_b: 1 });
                assert!(!event.game_end);
            }
            other => panic!("expected violation, got {:?}", other),
        }
        assert_eq!(*rules.touches(), TouchState::default());
    }

    #[test]
    fn test_team_change_resets_count_to_one() {
        let mut rules = RuleEngine::new();
        rules.register_touch(1, Team::A);
        rules.register_touch(1, Team::A);
        rules.register_touch(4, Team::B);

        assert_eq!(rules.touches().count, 1);
        assert_eq!(rules.touches().last_team, Some(Team::B));
        assert_eq!(rules.touches().last_player, Some(4));
    }

    #[test]
    fn test_net_crossing_clears_touches() {
        let mut rules = RuleEngine::new();
        rules.register_touch(1, Team::A);
        rules.register_touch(2, Team::A);
        rules.register_touch(3, Team::A);
        rules.net_crossed();

        assert_eq!(*rules.touches(), TouchState::default());
        assert_eq!(rules.register_touch(1, Team::A), TouchVerdict::Allowed);
        assert_eq!(rules.touches().count, 1);
    }

    #[test]
    fn test_game_decided_exactly_once() {
        let mut rules = RuleEngine::with_winning_score(3);
        let mut ends = 0;
        let mut last = Score::default();

        for team in [Team::A, Team::B, Team::A, Team::B, Team::A, Team::A, Team::B] {
            if let Some(event) = rules.award_point(team, ScoreReason::BallLanded) {
                assert!(event.score.team_a >= last.team_a);
                assert!(event.score.team_b >= last.team_b);
                last = event.score;
                if event.game_end {
                    ends += 1;
                    assert_eq!(event.winner, Some(Team::A));
                }
            }
        }

        assert_eq!(ends, 1);
        assert_eq!(rules.winner(), Some(Team::A));
        assert_eq!(rules.score(), Score { team_a: 3, team_b: 2 });
    }

    #[test]
    fn test_violation_after_game_end_awards_nothing() {
        let mut rules = RuleEngine::with_winning_score(1);
        assert!(rules.award_point(Team::B, ScoreReason::BallLanded).is_some());

        for _ in 0..3 {
            rules.register_touch(1, Team::A);
        }
        assert_eq!(
            rules.register_touch(1, Team::A),
            TouchVerdict::Violation(None)
        );
        assert_eq!(rules.score(), Score { team_a: 0, team_b: 1 });
    }
}
