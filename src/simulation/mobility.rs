//! Node placement and movement.
//!
//! - `GridPositionAllocator`: row-first grid placement of initial positions
//! - `RandomWalk2d`: piecewise-linear walk inside a rectangle, new speed and
//!   direction at every leg, reflecting at the edges
//!
//! All randomness is drawn from an RNG owned by the caller, so a seeded run
//! is reproducible without any process-wide state.

use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::Deserialize;
use std::f64::consts::TAU;
use std::time::Duration;

use super::geometry::Rectangle;
use super::types::Point;

/// Row-first grid: `grid_width` nodes per row, rows stacked along y.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GridPositionAllocator {
    pub min_x: f64,
    pub min_y: f64,
    pub delta_x: f64,
    pub delta_y: f64,
    pub grid_width: u32,
}

impl Default for GridPositionAllocator {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            delta_x: 5.0,
            delta_y: 10.0,
            grid_width: 3,
        }
    }
}

impl GridPositionAllocator {
    /// Position of the `index`-th node.
    pub fn position(&self, index: u32) -> Point {
        let width = self.grid_width.max(1);
        Point {
            x: self.min_x + self.delta_x * (index % width) as f64,
            y: self.min_y + self.delta_y * (index / width) as f64,
        }
    }
}

/// Parameters shared by every random walk in a run.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RandomWalkParameters {
    /// Rectangle the walk is confined to.
    pub bounds: Rectangle,
    /// Speed range in m/s, drawn uniformly per leg.
    pub speed_min: f64,
    pub speed_max: f64,
    /// Length of one leg in seconds.
    pub leg_duration: f64,
}

impl Default for RandomWalkParameters {
    fn default() -> Self {
        Self {
            bounds: Rectangle::new(0.0, 5.0, 0.0, 10.0),
            speed_min: 2.0,
            speed_max: 4.0,
            leg_duration: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomWalk2d {
    bounds: Rectangle,
    speed: Uniform<f64>,
    direction: Uniform<f64>,
    leg_duration: Duration,
    leg_start: Duration,
    leg_origin: Point,
    velocity: Point,
}

impl RandomWalk2d {
    /// Start a walk at `start` (clamped into the bounds) at time zero.
    pub fn new<R: Rng + ?Sized>(start: Point, parameters: &RandomWalkParameters, rng: &mut R) -> Self {
        if !parameters.bounds.contains(&start) {
            log::debug!("Start position {:?} outside walk bounds, clamping", start);
        }
        let mut walk = Self {
            bounds: parameters.bounds,
            speed: Uniform::new_inclusive(parameters.speed_min, parameters.speed_max),
            direction: Uniform::new(0.0, TAU),
            // A leg too long for a `Duration` never ends
            leg_duration: Duration::try_from_secs_f64(parameters.leg_duration).unwrap_or(Duration::MAX),
            leg_start: Duration::ZERO,
            leg_origin: parameters.bounds.clamp(&start),
            velocity: Point::new(0.0, 0.0),
        };
        walk.velocity = walk.draw_velocity(rng);
        walk
    }

    fn draw_velocity<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        let speed = self.speed.sample(rng);
        let direction = self.direction.sample(rng);
        Point::new(speed * direction.cos(), speed * direction.sin())
    }

    fn position_in_leg(&self, time: Duration) -> Point {
        let dt = time.saturating_sub(self.leg_start).as_secs_f64();
        let moved = Point::new(self.leg_origin.x + self.velocity.x * dt, self.leg_origin.y + self.velocity.y * dt);
        self.bounds.reflect(&moved)
    }

    /// Position at `time`, starting as many new legs as have elapsed.
    ///
    /// Queries are expected in nondecreasing time order; an earlier query is
    /// answered from the current leg.
    pub fn position_at<R: Rng + ?Sized>(&mut self, time: Duration, rng: &mut R) -> Point {
        if self.leg_duration.is_zero() {
            return self.leg_origin;
        }
        loop {
            let Some(leg_end) = self.leg_start.checked_add(self.leg_duration) else {
                break;
            };
            if time < leg_end {
                break;
            }
            self.leg_origin = self.position_in_leg(leg_end);
            self.leg_start = leg_end;
            self.velocity = self.draw_velocity(rng);
        }
        self.position_in_leg(time)
    }
}

/// Movement model of a single node.
#[derive(Debug, Clone)]
pub enum Mobility {
    Static(Point),
    RandomWalk(RandomWalk2d),
}

impl Mobility {
    pub fn position_at<R: Rng + ?Sized>(&mut self, time: Duration, rng: &mut R) -> Point {
        match self {
            Mobility::Static(position) => *position,
            Mobility::RandomWalk(walk) => walk.position_at(time, rng),
        }
    }
}
