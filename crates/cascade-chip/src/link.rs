//! UART link algebra.
//!
//! Each chip has four PISO (transmit) lanes per direction family and four
//! POSI (receive) lanes. Which lane faces which neighbor is fixed by the
//! signed chip-id offset Δ = parent − daughter:
//!
//! | Δ | parent PISO-US | parent POSI | daughter POSI | daughter PISO-DS |
//! |-----|---|---|---|---|
//! | +10 | 3 | 0 | 2 | 1 |
//! | −10 | 1 | 2 | 0 | 3 |
//! | −1  | 2 | 3 | 1 | 0 |
//! | +1  | 0 | 1 | 3 | 2 |
//!
//! The four columns are kept in one table so they cannot drift out of
//! mutual consistency. Any Δ outside {±1, ±10} is a programming error,
//! never a recoverable runtime condition.

use std::fmt;

/// One row of the lane table: (Δ, parent PISO-US, parent POSI,
/// daughter POSI, daughter PISO-DS).
const LANE_TABLE: [(i16, u8, u8, u8, u8); 4] = [
    (10, 3, 0, 2, 1),
    (-10, 1, 2, 0, 3),
    (-1, 2, 3, 1, 0),
    (1, 0, 1, 3, 2),
];

/// Valid chip-id offsets, in walk/waitlist priority order.
pub const VALID_OFFSETS: [i16; 4] = [10, -10, 1, -1];

/// Errors from the lane algebra. These indicate misuse, not bus trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Δ outside {±1, ±10}.
    InvalidOffset {
        /// The offending parent − daughter offset.
        delta: i16,
    },
    /// Lane index outside 0..=3.
    InvalidLane {
        /// The offending lane index.
        lane: u8,
    },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOffset { delta } => {
                write!(f, "invalid chip-id offset {delta} (expected ±1 or ±10)")
            }
            Self::InvalidLane { lane } => write!(f, "invalid lane index {lane} (expected 0..=3)"),
        }
    }
}

impl std::error::Error for LinkError {}

/// Signed chip-id offset parent − daughter.
#[must_use]
pub const fn delta(parent_id: u8, daughter_id: u8) -> i16 {
    parent_id as i16 - daughter_id as i16
}

fn row(delta: i16) -> Result<&'static (i16, u8, u8, u8, u8), LinkError> {
    LANE_TABLE
        .iter()
        .find(|r| r.0 == delta)
        .ok_or(LinkError::InvalidOffset { delta })
}

/// Parent upstream-transmit (PISO-US) lane facing the daughter at `delta`.
pub fn parent_piso_us_lane(delta: i16) -> Result<u8, LinkError> {
    row(delta).map(|r| r.1)
}

/// Parent receive (POSI) lane facing the daughter at `delta`.
pub fn parent_posi_lane(delta: i16) -> Result<u8, LinkError> {
    row(delta).map(|r| r.2)
}

/// Daughter receive (POSI) lane facing a parent at `delta`.
pub fn daughter_posi_lane(delta: i16) -> Result<u8, LinkError> {
    row(delta).map(|r| r.3)
}

/// Daughter downstream-transmit (PISO-DS) lane facing a parent at `delta`.
pub fn daughter_piso_ds_lane(delta: i16) -> Result<u8, LinkError> {
    row(delta).map(|r| r.4)
}

/// Chip id reached through a PISO lane of `chip_id`. The same lane → Δ map
/// holds for both the upstream and downstream PISO families.
pub fn daughter_id_for_piso_lane(lane: u8, chip_id: u8) -> Result<u8, LinkError> {
    let d = LANE_TABLE
        .iter()
        .find(|r| r.1 == lane)
        .ok_or(LinkError::InvalidLane { lane })?
        .0;
    // Δ = chip − daughter, so the daughter sits at chip − Δ.
    Ok((i16::from(chip_id) - d) as u8)
}

/// Chip id of the parent feeding a POSI lane of `chip_id`.
pub fn mother_id_for_posi_lane(lane: u8, chip_id: u8) -> Result<u8, LinkError> {
    let d = LANE_TABLE
        .iter()
        .find(|r| r.3 == lane)
        .ok_or(LinkError::InvalidLane { lane })?
        .0;
    // Δ = mother − chip, so the mother sits at chip + Δ.
    Ok((i16::from(chip_id) + d) as u8)
}

/// Whether `b` is a physical neighbor of `a`.
///
/// Δ = b − a must be ±1 or ±10, and a ±1 move must not cross the ones-digit
/// 0/1 boundary: column 0 does not exist, so e.g. 20 ↔ 21 are in different
/// rows despite differing by one.
#[must_use]
pub fn is_valid_neighbor(a: u8, b: u8) -> bool {
    let d = i16::from(b) - i16::from(a);
    if !VALID_OFFSETS.contains(&d) {
        return false;
    }
    if d.abs() == 1 && ((a % 10 == 0 && b % 10 == 1) || (a % 10 == 1 && b % 10 == 0)) {
        return false;
    }
    true
}
