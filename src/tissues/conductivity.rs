//! Tissue classes and conductivities.

use serde::{Deserialize, Serialize};

/// Known tissue classes. Skull classes and brain classes occupy
/// contiguous code ranges so labelled volumes can be scanned with
/// simple range tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TissueClass {
    NoTissue = 0,
    Scalp = 1,
    Fat = 2,
    Muscle = 3,
    Csf = 4,
    Blood = 5,
    Eye = 6,
    Air = 7,
    Skull = 8,
    SkullCompact = 9,
    SkullSpongy = 10,
    SkullSuture = 11,
    Brain = 12,
    Grey = 13,
    White = 14,
}

pub const NUM_TISSUES: usize = 15;

pub const SKULL_MIN: u8 = TissueClass::Skull as u8;
pub const SKULL_MAX: u8 = TissueClass::SkullSuture as u8;
pub const BRAIN_MIN: u8 = TissueClass::Brain as u8;
pub const BRAIN_MAX: u8 = TissueClass::White as u8;

impl TissueClass {
    pub const ALL: [TissueClass; NUM_TISSUES] = [
        TissueClass::NoTissue,
        TissueClass::Scalp,
        TissueClass::Fat,
        TissueClass::Muscle,
        TissueClass::Csf,
        TissueClass::Blood,
        TissueClass::Eye,
        TissueClass::Air,
        TissueClass::Skull,
        TissueClass::SkullCompact,
        TissueClass::SkullSpongy,
        TissueClass::SkullSuture,
        TissueClass::Brain,
        TissueClass::Grey,
        TissueClass::White,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Default isotropic conductivity in S/m.
    pub fn conductivity(self) -> f64 {
        match self {
            TissueClass::NoTissue => 0.0,
            TissueClass::Scalp => 0.33,
            TissueClass::Fat => 0.04,
            TissueClass::Muscle => 0.33,
            TissueClass::Csf => 1.79,
            TissueClass::Blood => 0.6,
            TissueClass::Eye => 1.5,
            TissueClass::Air => 0.0,
            TissueClass::Skull => 0.0105,
            TissueClass::SkullCompact => 0.0046,
            TissueClass::SkullSpongy => 0.0166,
            TissueClass::SkullSuture => 0.0105,
            TissueClass::Brain => 0.33,
            TissueClass::Grey => 0.33,
            TissueClass::White => 0.14,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TissueClass::NoTissue => "None",
            TissueClass::Scalp => "Scalp",
            TissueClass::Fat => "Fat",
            TissueClass::Muscle => "Muscle",
            TissueClass::Csf => "CSF",
            TissueClass::Blood => "Blood",
            TissueClass::Eye => "Eye",
            TissueClass::Air => "Air",
            TissueClass::Skull => "Skull",
            TissueClass::SkullCompact => "SkullCompact",
            TissueClass::SkullSpongy => "SkullSpongy",
            TissueClass::SkullSuture => "SkullSuture",
            TissueClass::Brain => "Brain",
            TissueClass::Grey => "Grey",
            TissueClass::White => "White",
        }
    }
}

/// Brain conductivity weighted by tissue proportions.
pub fn weighted_brain_conductivity() -> f64 {
    0.57 * TissueClass::Grey.conductivity()
        + 0.37 * TissueClass::White.conductivity()
        + 0.05 * TissueClass::Csf.conductivity()
        + 0.01 * TissueClass::Blood.conductivity()
}

/// Conductivity used when a model groups brain and scalp together.
pub fn weighted_brain_scalp_conductivity() -> f64 {
    0.5 * weighted_brain_conductivity() + 0.5 * TissueClass::Scalp.conductivity()
}

pub const SKULL_COND_MIN_AGE: f64 = 0.0;
pub const SKULL_COND_MAX_AGE: f64 = 100.0;

const SKULL_COND_BIRTH: f64 = 0.0500;
const SKULL_COND_OLD: f64 = 0.0063;
const SKULL_COND_DECAY_YEARS: f64 = 12.0;

/// Absolute skull conductivity in S/m as a function of age in years.
/// Monotone decreasing, exponential between the infant and elderly
/// bounds; age is clipped to [0, 100].
pub fn age_to_skull_conductivity(age: f64) -> f64 {
    let age = age.clamp(SKULL_COND_MIN_AGE, SKULL_COND_MAX_AGE);
    SKULL_COND_OLD + (SKULL_COND_BIRTH - SKULL_COND_OLD) * (-age / SKULL_COND_DECAY_YEARS).exp()
}

/// Split a whole-skull conductivity into compact and spongy parts so
/// that the radial series resistance of the layered skull matches the
/// bulk value. `spongy_percentage` is the spongy thickness fraction,
/// `compact_to_spongy_ratio` the conductivity ratio spongy/compact.
pub fn split_skull_conductivity(
    skull_cond: f64,
    compact_to_spongy_ratio: f64,
    spongy_percentage: f64,
) -> (f64, f64) {
    let p = spongy_percentage.clamp(0.0, 1.0);
    let compact = skull_cond * ((1.0 - p) + p / compact_to_spongy_ratio);
    let spongy = compact * compact_to_spongy_ratio;
    (compact, spongy)
}
