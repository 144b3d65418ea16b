//! Bring-up driver for Cascade daisy-chained ASIC tiles.
//!
//! The chips sit on a grid behind a shared single-master serial bus per
//! UART channel; every unaddressed chip listens at the setup address until
//! discovery moves it to its grid id. This crate owns the full sequence:
//!
//! ```text
//! Phases (run::run_discovery):
//!   setup_root        — address and configure each channel's root chip
//!   walk_root         — extend each root's chain through its row
//!   iterate_waitlist  — retry everything unreached until a fixpoint
//!
//! Substrate:
//!   reconcile — bounded write/verify loop absorbing bus flakiness
//!   topology  — graph rebuilt from lane state, JSON export
//! ```
//!
//! # Quick start
//!
//! ```
//! use cascade_driver::{
//!     build_network, default_root_assignments, export_topology, run_discovery,
//!     Controller, Headless, SimBus, TuningParams,
//! };
//!
//! # fn main() -> cascade_driver::Result<()> {
//! let bus = SimBus::new().with_chain(1, 1, &[21, 22, 23]);
//! let mut ctrl = Controller::new(bus);
//!
//! let roots = default_root_assignments(1, 1);
//! let report = run_discovery(&mut ctrl, &roots, &TuningParams::default(), &mut Headless)?;
//!
//! let network = build_network(&ctrl, &roots)?;
//! let doc = export_topology(&network, "tile-1", "2.5.0", &report.unresolved);
//! println!("{}", serde_json::to_string_pretty(&doc).unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! Verify failures are never `Err`: a chip that will not configure is
//! rolled back, evicted, and reported as unresolved. `Err` is reserved for
//! driver misuse (unknown chip, impossible lane pairing).

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod bringup;
mod bus;
mod controller;
mod error;
mod reconcile;
mod run;
mod sim;
mod topology;
mod waitlist;
mod walk;

pub use cascade_chip::{ChipConfig, ChipKey};

pub use bringup::{
    assign_chip_id, attempt_link, quiesce_trigger_frontend, LinkAttempt, TuningParams,
};
pub use bus::BusTransport;
pub use controller::{Controller, Diff, RegisterDiff};
pub use error::{CascadeError, Result};
pub use reconcile::{reconcile_chip, reconcile_registers, ReconcileOptions, ReconcileResult};
pub use run::{
    channel_span, default_root_assignments, run_discovery, setup_root, DiscoveryReport,
    RootAssignment, DEFAULT_ROOT_IDS,
};
pub use sim::SimBus;
pub use topology::{
    build_network, export_topology, miso_us_position, ChannelGraph, LinkEdge, LinkFamily,
    Network, NetworkNode, MISO_DS_UART_MAP, MISO_US_UART_MAP, MOSI_UART_MAP,
};
pub use waitlist::{iterate_waitlist, Decision, Gate, Headless, UnresolvedChip};
pub use walk::{seed_unreachable, walk_root, WALK_LANE_PRIORITY};
