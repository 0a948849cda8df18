//! Co-adding astronomical spectra onto a common wavelength grid.
//!
//! A run loads spectra ([`data::loader`]), optionally rescales them
//! ([`normalize`]), resamples them onto a [`grid::Grid`] ([`rebin`]), combines
//! them bin by bin ([`stack`]) and writes the result ([`writer`]).
//! [`pipeline::Pipeline`] drives those steps from a [`config::Config`].

pub mod config;
pub mod data;
pub mod error;
pub mod grid;
pub mod normalize;
pub mod pipeline;
pub mod rebin;
pub mod stack;
pub mod stats;
pub mod writer;

pub use error::{Result, StackingError};
