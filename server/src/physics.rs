//! Authoritative ball simulation.
//!
//! The ball advances in fixed ticks using per-tick units: velocities are
//! pixels per tick and gravity is pixels per tick squared. Screen y grows
//! downwards, so negative vertical velocity moves the ball up.

use arena_shared::{
    BallSnapshot, HitKind, HitRequest, Team, AIR_DRAG, BALL_RADIUS, BALL_SPAWN_X, BALL_SPAWN_Y,
    CEILING_RESTITUTION, COURT_WIDTH, FLOOR_FRICTION, FLOOR_RESTITUTION, FLOOR_Y, GRAVITY,
    MIN_BOUNCE_SPEED, NET_RESTITUTION, NET_TOP_Y, NET_WIDTH, NET_X, WALL_RESTITUTION,
};

///Represents a vector in 2D screen space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is down.
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

/// Half of the court, split at the net.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn of(x: f32) -> Side {
        if x < NET_X {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// The team defending this half.
    pub fn defender(self) -> Team {
        match self {
            Side::Left => Team::A,
            Side::Right => Team::B,
        }
    }
}

/// Gauge tier multiplier for spikes. Overcharging is punished with the
/// weakest hit instead of being rejected.
pub fn spike_multiplier(gauge: f32) -> f32 {
    let gauge = if gauge.is_finite() { gauge } else { 0.0 };
    if gauge <= 50.0 {
        0.6
    } else if gauge <= 80.0 {
        0.9
    } else if gauge <= 100.0 {
        1.2
    } else {
        0.4
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub position: Vector2,
    pub velocity: Vector2,
    pub radius: f32,
    /// Side recorded at the end of the previous tick.
    pub side: Side,
}

impl Default for Ball {
    fn default() -> Self {
        Ball {
            position: Vector2::new(BALL_SPAWN_X, BALL_SPAWN_Y),
            velocity: Vector2::default(),
            radius: BALL_RADIUS,
            side: Side::Right,
        }
    }
}

/// What a single tick observed, for the rule engine to act on.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepOutcome {
    /// Set when the ball touched the floor this tick.
    pub landed: Option<Side>,
    pub crossed_net: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BallPhysics {
    ball: Ball,
}

impl BallPhysics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ball(&self) -> &Ball {
        &self.ball
    }

    pub fn snapshot(&self) -> BallSnapshot {
        BallSnapshot {
            x: self.ball.position.x,
            y: self.ball.position.y,
            vel_x: self.ball.velocity.x,
            vel_y: self.ball.velocity.y,
        }
    }

    /// Teleports the ball. The recorded side follows the new position so the
    /// move itself never counts as a net crossing.
    pub fn place(&mut self, x: f32, y: f32, vel_x: f32, vel_y: f32) {
        self.ball.position = Vector2::new(x, y);
        self.ball.velocity = Vector2::new(vel_x, vel_y);
        self.ball.side = Side::of(x);
    }

    /// Puts the ball back above the net with the given horizontal drift.
    pub fn respawn(&mut self, vel_x: f32) {
        let side = self.ball.side;
        self.ball = Ball {
            velocity: Vector2::new(vel_x, 0.0),
            side,
            ..Ball::default()
        };
    }

    /// Advances the ball by one fixed tick.
    pub fn step(&mut self) -> StepOutcome {
        let ball = &mut self.ball;
        let mut outcome = StepOutcome::default();

        ball.velocity.y += GRAVITY;
        ball.velocity = ball.velocity.scale(AIR_DRAG);
        ball.position = ball.position.add(&ball.velocity);

        // Side walls
        if ball.position.x - ball.radius < 0.0 {
            ball.position.x = ball.radius;
            ball.velocity.x *= -WALL_RESTITUTION;
        } else if ball.position.x + ball.radius > COURT_WIDTH {
            ball.position.x = COURT_WIDTH - ball.radius;
            ball.velocity.x *= -WALL_RESTITUTION;
        }

        // Ceiling
        if ball.position.y - ball.radius < 0.0 {
            ball.position.y = ball.radius;
            ball.velocity.y *= -CEILING_RESTITUTION;
        }

        resolve_net_collision(ball);

        // Floor
        let floor_contact = ball.position.y + ball.radius;
        if floor_contact >= FLOOR_Y {
            ball.position.y = FLOOR_Y - ball.radius;
            outcome.landed = Some(Side::of(ball.position.x));

            if ball.velocity.y.abs() > MIN_BOUNCE_SPEED {
                ball.velocity.y *= -FLOOR_RESTITUTION;
            } else {
                ball.velocity.y = 0.0;
            }
            ball.velocity.x *= FLOOR_FRICTION;
        }

        let side = Side::of(ball.position.x);
        if side != ball.side {
            ball.side = side;
            outcome.crossed_net = true;
        }

        outcome
    }

    /// Overwrites the ball velocity for an accepted hit.
    pub fn apply_hit(&mut self, hit: &HitRequest) {
        let dir = hit_direction(hit.direction);
        self.ball.velocity = match hit.power {
            HitKind::Toss => Vector2::new(dir * 3.0, -10.0),
            HitKind::Spike => {
                let multiplier = spike_multiplier(hit.gauge);
                Vector2::new(dir * 7.0 * multiplier, -6.0 * multiplier)
            }
        };
    }
}

fn hit_direction(direction: f32) -> f32 {
    if direction.is_finite() && direction < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Pushes the ball out of the net slab towards the side it came from.
fn resolve_net_collision(ball: &mut Ball) {
    let half = NET_WIDTH / 2.0;
    let overlaps = ball.position.x + ball.radius > NET_X - half
        && ball.position.x - ball.radius < NET_X + half
        && ball.position.y + ball.radius > NET_TOP_Y
        && ball.position.y - ball.radius < FLOOR_Y;

    if !overlaps {
        return;
    }

    if ball.velocity.x > 0.0 {
        ball.position.x = NET_X - half - ball.radius;
    } else {
        ball.position.x = NET_X + half + ball.radius;
    }
    ball.velocity.x *= -NET_RESTITUTION;
}
