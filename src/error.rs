use std::error;
use std::fmt;

#[derive(Debug)]

/**
 * Error to represent an invalid engine configuration or an invariant
 * violation detected before or during a run. All variants are deterministic
 * functions of the input configuration; nothing in this crate retries.
 */
pub enum Error {
    InvalidLevels(u32, u32),
    EmptyDomain(f64, f64),
    UnmappedDirection(usize),
    GraduationViolation(u32, u32),
    UnstableRelaxation(f64),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Error::*;

        match self {
            InvalidLevels(min, max) => {
                writeln!(fmt, "invalid level bounds: min_level={} max_level={}", min, max)
            }
            EmptyDomain(dx, dy) => {
                writeln!(fmt, "domain extents must be positive: ({}, {})", dx, dy)
            }
            UnmappedDirection(v) => {
                writeln!(fmt, "lattice direction {} has no flux-slot mapping", v)
            }
            GraduationViolation(la, lb) => {
                writeln!(fmt, "adjacent leaves at levels {} and {} break 2:1 graduation", la, lb)
            }
            UnstableRelaxation(s) => {
                writeln!(fmt, "relaxation rate {} outside the stable range (0, 2)", s)
            }
        }
    }
}

impl error::Error for Error {}
