//! # canvas-core — authoritative canvas state
//!
//! The [`Board`] owns a fixed `width * height` grid of cells and applies
//! sparse stroke diffs to it. Everything about rooms, membership and
//! fan-out lives in `canvas-collab`; this crate is synchronous and has no
//! notion of concurrency.

pub mod board;

pub use board::{
    ApplyOutcome, Board, BoardError, BoardSnapshot, Cell, Diff, DiffPolicy, DEFAULT_CELL, MAX_CELLS,
};
