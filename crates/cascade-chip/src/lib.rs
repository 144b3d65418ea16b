//! Silicon model for the Cascade daisy-chained readout ASIC.
//!
//! This crate has **no dependencies** and **no hardware access** — it is a
//! pure model of the silicon and its bridge controller: the chip-id space,
//! the four-lane UART link algebra, the configuration register map, and the
//! bridge register addresses.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`key`] | Chip identity (`ChipKey`), id-space constants |
//! | [`link`] | Lane algebra for Δ ∈ {±1, ±10}, neighbor validity |
//! | [`config`] | Per-chip configuration image and register addresses |
//! | [`bridge`] | Bridge (bus controller) register constants |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod config;
pub mod key;
pub mod link;

pub use config::ChipConfig;
pub use key::ChipKey;
