//! Shared pieces of the vdlink endpoint binaries.

pub mod logging;
