//! Curate, a tool that pins, builds and certifies the package set of a
//! versioned distribution.

#![warn(missing_docs)]

pub mod cli;
