//! Black-box integration tests driving the translator as a whole, as
//! opposed to the per-crate unit tests living alongside each module.
//!
//! This crate has no public API of its own; it exists only to host the
//! `#[cfg(test)]` suites below.

#[cfg(test)]
mod encode;
#[cfg(test)]
mod e2e;
#[cfg(test)]
mod interp_parity;
