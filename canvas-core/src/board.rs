//! Fixed-size shared canvas and diff application.
//!
//! A board is a flat, row-major grid of `width * height` cells. Strokes
//! arrive as ordered lists of [`Diff`]s and are written in order, so a later
//! diff at the same coordinate wins.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value stored in one cell of the canvas.
pub type Cell = i64;

/// Value every cell starts with.
pub const DEFAULT_CELL: Cell = 0;

/// Largest board a process will allocate (2048 x 2048 cells).
pub const MAX_CELLS: usize = 1 << 22;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("Invalid board dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    #[error("Board of {width}x{height} exceeds {max} cells")]
    TooLarge { width: usize, height: usize, max: usize },
    #[error("Diff coordinate {coord} outside board of {len} cells")]
    DiffOutOfRange { coord: i64, len: usize },
}

/// A single cell update: set cell `coord` to `val`.
///
/// Any JSON integer is accepted as `coord`. Values beyond the `i64` range
/// saturate, so they stay out of range and fall under the diff policy
/// instead of failing the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    #[serde(deserialize_with = "saturating_coord")]
    pub coord: i64,
    pub val: Cell,
}

fn saturating_coord<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    struct CoordVisitor;

    impl Visitor<'_> for CoordVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer cell coordinate")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            Ok(i64::try_from(v).unwrap_or(i64::MAX))
        }

        // Integers too large for u64/i64 arrive as floats.
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            if v.fract() != 0.0 {
                return Err(E::invalid_value(de::Unexpected::Float(v), &self));
            }
            Ok(v as i64)
        }
    }

    deserializer.deserialize_any(CoordVisitor)
}

impl Diff {
    pub fn new(coord: i64, val: Cell) -> Self {
        Self { coord, val }
    }
}

/// What to do with a diff whose coordinate falls outside the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffPolicy {
    /// Drop the offending diff, keep applying the rest of the stroke.
    #[default]
    Skip,
    /// Refuse the whole stroke; the board is left untouched.
    Reject,
}

/// Result of applying one stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub skipped: usize,
}

/// Serializable copy of a board, sent to late joiners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub width: usize,
    pub height: usize,
    pub data: Vec<Cell>,
}

/// The authoritative canvas of one room.
#[derive(Debug, Clone)]
pub struct Board {
    width: usize,
    height: usize,
    data: Vec<Cell>,
}

impl Board {
    /// Allocate a `width * height` board with every cell at [`DEFAULT_CELL`].
    pub fn new(width: usize, height: usize) -> Result<Self, BoardError> {
        let len = Self::cell_count(width, height)?;
        Ok(Self {
            width,
            height,
            data: vec![DEFAULT_CELL; len],
        })
    }

    /// Number of cells a `width * height` board holds, validating the
    /// dimensions without allocating. Boards above [`MAX_CELLS`] are refused.
    pub fn cell_count(width: usize, height: usize) -> Result<usize, BoardError> {
        if width == 0 || height == 0 {
            return Err(BoardError::InvalidDimensions { width, height });
        }
        match width.checked_mul(height) {
            Some(len) if len <= MAX_CELLS => Ok(len),
            _ => Err(BoardError::TooLarge { width, height, max: MAX_CELLS }),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.data
    }

    /// Cell at `coord`, or `None` when out of range.
    pub fn get(&self, coord: i64) -> Option<Cell> {
        self.index(coord).map(|i| self.data[i])
    }

    fn index(&self, coord: i64) -> Option<usize> {
        usize::try_from(coord).ok().filter(|&i| i < self.data.len())
    }

    /// Apply a stroke in order.
    ///
    /// Under [`DiffPolicy::Skip`] out-of-range diffs are dropped and counted;
    /// under [`DiffPolicy::Reject`] the stroke is validated up front and the
    /// first out-of-range diff fails the call before anything is written.
    pub fn apply_diffs(
        &mut self,
        diffs: &[Diff],
        policy: DiffPolicy,
    ) -> Result<ApplyOutcome, BoardError> {
        if policy == DiffPolicy::Reject {
            if let Some(bad) = diffs.iter().find(|d| self.index(d.coord).is_none()) {
                return Err(BoardError::DiffOutOfRange {
                    coord: bad.coord,
                    len: self.data.len(),
                });
            }
        }

        let mut outcome = ApplyOutcome::default();
        for diff in diffs {
            match self.index(diff.coord) {
                Some(i) => {
                    self.data[i] = diff.val;
                    outcome.applied += 1;
                }
                None => {
                    log::warn!(
                        "Skipping diff at coord {} (board has {} cells)",
                        diff.coord,
                        self.data.len()
                    );
                    outcome.skipped += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Copy the current grid for transfer to a new joiner.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            width: self.width,
            height: self.height,
            data: self.data.clone(),
        }
    }
}
