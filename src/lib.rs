//! Cascade is an adaptive multiresolution (MR) library for solving
//! time-dependent conservation laws, like lattice-Boltzmann transport, on
//! a hierarchy of nested Cartesian resolutions. A wavelet-style detail
//! indicator decides where the solution keeps full resolution; elsewhere
//! the mesh coarsens, and a flux-correction scheme evaluated on virtual
//! one-level-finer "overleaf" cells preserves conservation across
//! resolution jumps. The mesh is represented sparsely as sorted interval
//! runs per row and level, with a lazy set algebra used to carve out
//! neighborhoods and boundary regions without materializing dense masks.

pub mod adaptation;
pub mod error;
pub mod field;
pub mod interval_set;
pub mod lattice;
pub mod mesh;
pub mod prediction;
pub mod projection;
pub mod scheme;
pub mod subset;
