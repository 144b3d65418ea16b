//! `cascade` — command-line interface for Cascade tile bring-up.
//!
//! ```text
//! USAGE:
//!   cascade discover [OPTIONS]      Run discovery on a simulated tile
//!   cascade lane-map                Print the UART lane tables
//! ```
//!
//! `discover` drives the full sequence against the in-memory bus; pass
//! `--dead <id>` to depopulate grid positions and watch the walk bail and
//! the waitlist route around them.

use anyhow::{Context, Result};
use cascade_driver::{
    build_network, channel_span, default_root_assignments, export_topology, run_discovery,
    ChipKey, Controller, Decision, Gate, Headless, ReconcileOptions, SimBus, TuningParams,
};
use cascade_chip::key::is_assignable_id;
use cascade_chip::link;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::io::Write as _;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cascade", about = "Cascade tile bring-up CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run discovery against a simulated tile and export the topology.
    Discover {
        /// Bridge I/O group.
        #[arg(long, default_value_t = 1)]
        io_group: u8,
        /// Tile number (1 uses channels 1-4, 2 uses channels 5-8).
        #[arg(long, default_value_t = 1)]
        tile: u8,
        /// Network name; the document is written to <name>.json.
        #[arg(long, default_value = "tile-network")]
        name: String,
        /// Layout revision recorded in the document.
        #[arg(long, default_value = "2.5.0")]
        layout: String,
        /// Grid positions to leave unpopulated (repeatable).
        #[arg(long = "dead", value_name = "CHIP_ID")]
        dead: Vec<u8>,
        /// Print the document instead of writing it.
        #[arg(long)]
        stdout: bool,
        /// Confirm each waitlist attempt on stdin.
        #[arg(long)]
        interactive: bool,
        /// Transmitter current per slice [DAC].
        #[arg(long, default_value_t = 0)]
        tx_diff: u8,
        /// Transmitter slice count [DAC].
        #[arg(long, default_value_t = 15)]
        tx_slices: u8,
        /// Master reference current trim [DAC].
        #[arg(long, default_value_t = 16)]
        ref_current_trim: u8,
        /// Receiver termination [DAC].
        #[arg(long, default_value_t = 2)]
        r_term: u8,
        /// Receiver bias [DAC].
        #[arg(long, default_value_t = 8)]
        i_rx: u8,
        /// Write passes per reconciliation.
        #[arg(long, default_value_t = 2)]
        write_retries: u8,
        /// Read attempts per register per verify pass.
        #[arg(long, default_value_t = 2)]
        verify_reads: u8,
    },
    /// Print the UART lane tables.
    LaneMap,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Discover {
            io_group,
            tile,
            name,
            layout,
            dead,
            stdout,
            interactive,
            tx_diff,
            tx_slices,
            ref_current_trim,
            r_term,
            i_rx,
            write_retries,
            verify_reads,
        } => {
            let params = TuningParams {
                tx_diff,
                tx_slices,
                ref_current_trim,
                r_term,
                i_rx,
                reconcile: ReconcileOptions { write_retries, verify_reads },
            };
            cmd_discover(io_group, tile, &name, &layout, &dead, stdout, interactive, &params)
        }
        Cmd::LaneMap => {
            cmd_lane_map();
            Ok(())
        }
    }
}

/// Waitlist gate that asks on stdin, like an operator sitting at the tile.
struct StdinGate;

impl Gate for StdinGate {
    fn attempt(&mut self, parent: ChipKey, daughter: ChipKey) -> Decision {
        print!("parent {parent}  daughter {daughter} — proceed? [Y/n] ");
        if read_yes_no() { Decision::Proceed } else { Decision::Skip }
    }

    fn continue_iteration(&mut self, remaining: &BTreeSet<u8>) -> bool {
        print!("{} chips remain {remaining:?} — keep iterating? [Y/n] ", remaining.len());
        read_yes_no()
    }
}

fn read_yes_no() -> bool {
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    !matches!(line.trim(), "n" | "N" | "no" | "false" | "F" | "0")
}

#[allow(clippy::too_many_arguments)]
fn cmd_discover(
    io_group: u8,
    tile: u8,
    name: &str,
    layout: &str,
    dead: &[u8],
    stdout: bool,
    interactive: bool,
    params: &TuningParams,
) -> Result<()> {
    let roots = default_root_assignments(io_group, tile);

    // populate every assignable grid position the tile's channels answer
    // for, minus the positions declared dead
    let mut bus = SimBus::new();
    for root in &roots {
        let ids: Vec<u8> = channel_span(root.io_channel, root.chip_id)
            .filter(|id| is_assignable_id(*id) && !dead.contains(id))
            .collect();
        bus = bus.with_chain(root.io_group, root.io_channel, &ids);
    }

    let mut ctrl = Controller::new(bus);
    let report = if interactive {
        run_discovery(&mut ctrl, &roots, params, &mut StdinGate)?
    } else {
        run_discovery(&mut ctrl, &roots, params, &mut Headless)?
    };

    println!("roots configured:  {}", report.roots.len());
    println!("chips configured:  {}", ctrl.chip_count());
    println!("unresolved:        {}", report.unresolved.len());
    for chip in &report.unresolved {
        println!("  {}  attempted lanes {:?}", chip.key, chip.piso_lanes);
    }

    let network = build_network(&ctrl, &roots)?;
    let doc = export_topology(&network, name, layout, &report.unresolved);
    let rendered = serde_json::to_string_pretty(&doc)?;
    if stdout {
        println!("{rendered}");
    } else {
        let path = format!("{name}.json");
        std::fs::write(&path, rendered).with_context(|| format!("writing {path}"))?;
        println!("network written to {path}");
    }
    Ok(())
}

fn cmd_lane_map() {
    println!("Δ = parent − daughter\n");
    println!("   Δ   parent PISO-US   parent POSI   daughter POSI   daughter PISO-DS");
    for delta in [10i16, -10, -1, 1] {
        println!(
            " {delta:>3}   {:^14}   {:^11}   {:^13}   {:^16}",
            link::parent_piso_us_lane(delta).unwrap_or_default(),
            link::parent_posi_lane(delta).unwrap_or_default(),
            link::daughter_posi_lane(delta).unwrap_or_default(),
            link::daughter_piso_ds_lane(delta).unwrap_or_default(),
        );
    }
    println!("\nexported array maps:");
    println!("  miso_us_uart_map {:?}", cascade_driver::MISO_US_UART_MAP);
    println!("  miso_ds_uart_map {:?}", cascade_driver::MISO_DS_UART_MAP);
    println!("  mosi_uart_map    {:?}", cascade_driver::MOSI_UART_MAP);
}
