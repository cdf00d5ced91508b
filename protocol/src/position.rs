//! Canvas coordinates and the three spaces they live in.
//!
//! *Raw* positions carry sub-pixel precision as transmitted for player and
//! pixel records. Dividing by [`crate::CHUNK_WIDTH`] once gives a *canvas*
//! position addressing individual pixels; dividing again gives the *tile*
//! position addressing a whole chunk.

use crate::{CHUNK_WIDTH, WORLD_BORDER};
use std::ops::{Add, Div, Mul, Rem, Sub};

/// A signed 2D integer coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// Floor division, rounding toward negative infinity.
fn div_floor(value: i32, divisor: i32) -> i32 {
    let quot = value / divisor;
    if value % divisor != 0 && (value < 0) != (divisor < 0) {
        quot - 1
    } else {
        quot
    }
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Position { x, y }
    }

    /// Converts a raw position to a canvas (pixel) position.
    ///
    /// The x axis truncates toward zero; the y axis rounds toward negative
    /// infinity because increasing y visually means "up". This asymmetry is
    /// observed protocol behavior and must not be "fixed".
    pub fn to_canvas(self) -> Position {
        Position {
            x: self.x / CHUNK_WIDTH,
            y: div_floor(self.y, CHUNK_WIDTH),
        }
    }

    /// Converts a canvas position to the position of its owning tile.
    /// Floor division on both axes.
    pub fn to_tile(self) -> Position {
        Position {
            x: div_floor(self.x, CHUNK_WIDTH),
            y: div_floor(self.y, CHUNK_WIDTH),
        }
    }

    /// Converts a canvas position back to a raw position.
    pub fn to_raw(self) -> Position {
        self * CHUNK_WIDTH
    }

    /// The canvas position at the center of this tile position.
    pub fn tile_center_canvas(self) -> Position {
        self * CHUNK_WIDTH + Position::new(CHUNK_WIDTH / 2, CHUNK_WIDTH / 2)
    }

    /// Whether a tile position lies within the world border.
    pub fn is_within_border(self) -> bool {
        let min = -WORLD_BORDER - 1;
        self.x >= min && self.x <= WORLD_BORDER && self.y >= min && self.y <= WORLD_BORDER
    }

    /// Clamps a tile position into the world border.
    pub fn clamp_to_border(self) -> Position {
        let min = -WORLD_BORDER - 1;
        Position {
            x: self.x.clamp(min, WORLD_BORDER),
            y: self.y.clamp(min, WORLD_BORDER),
        }
    }

    /// Iterates all positions in the rectangle between `self` (top-left)
    /// and `other` (bottom-right), inclusive.
    pub fn iter_rect(self, other: Position) -> impl Iterator<Item = Position> {
        (self.x..=other.x).flat_map(move |x| (self.y..=other.y).map(move |y| Position::new(x, y)))
    }

    /// Iterates positions on the rasterized line from `self` to `other`
    /// (Bresenham).
    pub fn iter_line(self, other: Position) -> impl Iterator<Item = Position> {
        let (mut x, mut y) = (self.x, self.y);
        let (x2, y2) = (other.x, other.y);
        let dx = (x2 - x).abs();
        let dy = -(y2 - y).abs();
        let sx = if x < x2 { 1 } else { -1 };
        let sy = if y < y2 { 1 } else { -1 };
        let mut err = dx + dy;
        let mut done = false;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            let current = Position::new(x, y);
            if x == x2 && y == y2 {
                done = true;
            } else {
                let e2 = err * 2;
                if e2 >= dy {
                    err += dy;
                    x += sx;
                }
                if e2 <= dx {
                    err += dx;
                    y += sy;
                }
            }
            Some(current)
        })
    }
}

impl Add for Position {
    type Output = Position;
    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Position {
    type Output = Position;
    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<i32> for Position {
    type Output = Position;
    fn mul(self, rhs: i32) -> Position {
        Position::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<i32> for Position {
    type Output = Position;
    fn div(self, rhs: i32) -> Position {
        Position::new(self.x / rhs, self.y / rhs)
    }
}

impl Rem<i32> for Position {
    type Output = Position;
    fn rem(self, rhs: i32) -> Position {
        Position::new(self.x % rhs, self.y % rhs)
    }
}

impl From<(i32, i32)> for Position {
    fn from((x, y): (i32, i32)) -> Self {
        Position::new(x, y)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
