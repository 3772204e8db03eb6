//! Geometry helpers for range checks and bounded movement.
//!
//! Contains helper functions for:
//! - Distance calculations (squared distance to avoid sqrt in hot paths)
//! - Rectangle containment
//! - Reflecting a coordinate back into an interval, used by the random walk

use serde::Deserialize;

use super::types::Point;

/// Axis-aligned rectangle given by its x and y extents.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Rectangle {
    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self { x_min, x_max, y_min, y_max }
    }

    /// Inclusive point-in-rectangle test.
    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x_min && p.x <= self.x_max && p.y >= self.y_min && p.y <= self.y_max
    }

    /// Fold a point that has moved outside the rectangle back inside, as if it
    /// had bounced off the edges.
    pub fn reflect(&self, p: &Point) -> Point {
        Point {
            x: reflect_into(p.x, self.x_min, self.x_max),
            y: reflect_into(p.y, self.y_min, self.y_max),
        }
    }

    /// Clamp a point onto the rectangle.
    pub fn clamp(&self, p: &Point) -> Point {
        Point {
            x: p.x.clamp(self.x_min, self.x_max),
            y: p.y.clamp(self.y_min, self.y_max),
        }
    }
}

/// Squared Euclidean distance.
///
/// Range checks compare d² against range² so the square root is only taken
/// when the actual distance is logged.
pub fn distance2(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Convert squared distance back to distance.
pub fn distance_from_d2(d2: f64) -> f64 {
    d2.sqrt()
}

/// Mirror `value` at the interval edges until it lies inside `[min, max]`.
///
/// The mapping is a triangle wave with period `2 * (max - min)`, which equals
/// any number of elastic bounces. A degenerate interval collapses to `min`.
pub fn reflect_into(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span <= 0.0 {
        return min;
    }
    let offset = (value - min).rem_euclid(2.0 * span);
    if offset <= span { min + offset } else { max - (offset - span) }
}
