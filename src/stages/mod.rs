//! The packaging stages. `Packager` runs them as CLEAN, UNPACK, VALIDATE
//! and ASSEMBLE around the build and install command sequences.

pub mod assemble;
pub mod clean;
pub mod unpack;
pub mod validate;
