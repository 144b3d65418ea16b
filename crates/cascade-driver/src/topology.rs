//! Network topology reconstruction and export.
//!
//! The topology is not tracked during discovery; it is rebuilt afterwards
//! from the lane-enable state of the working set, so the exported document
//! reflects what the chips are actually configured to do rather than what
//! the walk intended. Three directed edge families mirror the three lane
//! families: `miso_us` (chip-to-chip upstream data), `miso_ds` (downstream
//! toward the bridge), `mosi` (command fan-out).

use crate::bus::BusTransport;
use crate::controller::Controller;
use crate::error::Result;
use crate::run::RootAssignment;
use crate::waitlist::UnresolvedChip;
use cascade_chip::link;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// A vertex in a channel graph: the bridge-facing external port or a chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NetworkNode {
    /// The bridge side of the channel.
    External,
    /// A chip, by id. Ids derived from lane state may name positions no
    /// chip occupies; they stay in the graph as configured, not as found.
    Chip(u8),
}

/// Directed edge family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFamily {
    /// Upstream data, daughter-facing transmit lanes.
    MisoUpstream,
    /// Downstream data, parent-facing transmit lanes.
    MisoDownstream,
    /// Command fan-out, receive lanes.
    Mosi,
}

/// One directed link, tagged with the transmitting/receiving lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEdge {
    /// Transmitting end (receiving end for `Mosi`).
    pub from: NetworkNode,
    /// The other end.
    pub to: NetworkNode,
    /// Lane index on `from`.
    pub lane: u8,
}

/// Per-channel multigraph, one edge list per family.
#[derive(Debug, Default, Clone)]
pub struct ChannelGraph {
    /// Nodes in insertion order; `External` first when present.
    pub nodes: Vec<NetworkNode>,
    /// Upstream-data edges.
    pub miso_us: Vec<LinkEdge>,
    /// Downstream-data edges.
    pub miso_ds: Vec<LinkEdge>,
    /// Command edges.
    pub mosi: Vec<LinkEdge>,
}

impl ChannelGraph {
    fn push_node(&mut self, node: NetworkNode) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    /// The exported node list tracks the `miso_us` family only; ids that
    /// appear solely at the far end of `miso_ds`/`mosi` edges (a root's
    /// bridge-facing lanes decode to such phantoms) never become nodes.
    fn push_edge(&mut self, family: LinkFamily, edge: LinkEdge) {
        match family {
            LinkFamily::MisoUpstream => {
                self.push_node(edge.from);
                self.push_node(edge.to);
                self.miso_us.push(edge);
            }
            LinkFamily::MisoDownstream => self.miso_ds.push(edge),
            LinkFamily::Mosi => self.mosi.push(edge),
        }
    }

    /// Outgoing `miso_us` neighbors of `node`, slotted by array position
    /// (see [`miso_us_position`]).
    #[must_use]
    pub fn miso_us_row(&self, node: NetworkNode) -> [Option<u8>; 4] {
        let mut row = [None; 4];
        for edge in &self.miso_us {
            if edge.from != node {
                continue;
            }
            if let NetworkNode::Chip(to) = edge.to {
                row[miso_us_position(node, edge.to) as usize] = Some(to);
            }
        }
        row
    }
}

/// Tile topology: group → channel → graph.
#[derive(Debug, Default)]
pub struct Network {
    /// Channel graphs in group/channel order.
    pub channels: BTreeMap<u8, BTreeMap<u8, ChannelGraph>>,
}

/// Array slot a `miso_us` neighbor occupies in the exported per-node row.
///
/// Historical layout convention, distinct from the lane index: the
/// external link and the +1 neighbor share slot 3.
#[must_use]
pub fn miso_us_position(from: NetworkNode, to: NetworkNode) -> u8 {
    let (NetworkNode::Chip(a), NetworkNode::Chip(b)) = (from, to) else {
        return 3;
    };
    match i16::from(b) - i16::from(a) {
        1 => 3,
        -1 => 1,
        -10 => 0,
        _ => 2,
    }
}

/// Rebuild the tile topology from the working set's lane state.
///
/// Every channel named in `roots` gets an external node wired to its root
/// id on lane 0 in all three families, whether or not the root configured.
///
/// # Errors
///
/// `InvalidLane` only if a configuration image was corrupted out-of-band.
pub fn build_network<B: BusTransport>(
    ctrl: &Controller<B>,
    roots: &[RootAssignment],
) -> Result<Network> {
    let mut network = Network::default();

    for root in roots {
        let graph = network
            .channels
            .entry(root.io_group)
            .or_default()
            .entry(root.io_channel)
            .or_default();
        let ext = NetworkNode::External;
        let chip = NetworkNode::Chip(root.chip_id);
        graph.push_node(ext);
        graph.push_edge(LinkFamily::MisoUpstream, LinkEdge { from: ext, to: chip, lane: 0 });
        graph.push_edge(LinkFamily::MisoDownstream, LinkEdge { from: chip, to: ext, lane: 0 });
        graph.push_edge(LinkFamily::Mosi, LinkEdge { from: ext, to: chip, lane: 0 });
    }

    for (key, cfg) in ctrl.chips() {
        let graph = network
            .channels
            .entry(key.io_group)
            .or_default()
            .entry(key.io_channel)
            .or_default();
        let from = NetworkNode::Chip(key.chip_id);

        for lane in 0..4u8 {
            if cfg.enable_piso_upstream[lane as usize] {
                let to = NetworkNode::Chip(link::daughter_id_for_piso_lane(lane, key.chip_id)?);
                graph.push_edge(LinkFamily::MisoUpstream, LinkEdge { from, to, lane });
            }
            if cfg.enable_piso_downstream[lane as usize] {
                let to = NetworkNode::Chip(link::daughter_id_for_piso_lane(lane, key.chip_id)?);
                graph.push_edge(LinkFamily::MisoDownstream, LinkEdge { from, to, lane });
            }
            if cfg.enable_posi[lane as usize] {
                let to = NetworkNode::Chip(link::mother_id_for_posi_lane(lane, key.chip_id)?);
                graph.push_edge(LinkFamily::Mosi, LinkEdge { from, to, lane });
            }
        }
    }
    Ok(network)
}

/// Lane → array-position maps recorded in the exported document so readers
/// can invert the per-node rows.
pub const MISO_US_UART_MAP: [u8; 4] = [3, 0, 1, 2];
/// See [`MISO_US_UART_MAP`].
pub const MISO_DS_UART_MAP: [u8; 4] = [1, 2, 3, 0];
/// See [`MISO_US_UART_MAP`].
pub const MOSI_UART_MAP: [u8; 4] = [2, 3, 0, 1];

/// Top-level shape of the exported controller configuration.
#[derive(Debug, Serialize)]
struct TopologyDocument<'a> {
    #[serde(rename = "_config_type")]
    config_type: &'static str,
    name: &'a str,
    asic_version: &'static str,
    layout: &'a str,
    network: Value,
    missing: Value,
}

/// Serialize the topology as a controller configuration document.
///
/// The shape is the established controller-config layout: a `network`
/// section with per-channel node lists (each node carrying its `miso_us`
/// row), the three lane maps, and a `missing` section keyed
/// group → channel → chip id → attempted lanes.
#[must_use]
pub fn export_topology(
    network: &Network,
    name: &str,
    layout: &str,
    unresolved: &[UnresolvedChip],
) -> Value {
    let mut net = Map::new();
    for (group, channels) in &network.channels {
        let mut group_map = Map::new();
        for (channel, graph) in channels {
            let nodes: Vec<Value> = graph
                .nodes
                .iter()
                .map(|&node| {
                    let mut entry = Map::new();
                    match node {
                        NetworkNode::External => {
                            entry.insert("chip_id".into(), json!("ext"));
                        }
                        NetworkNode::Chip(id) => {
                            entry.insert("chip_id".into(), json!(id));
                        }
                    }
                    let row: Vec<Value> = graph
                        .miso_us_row(node)
                        .iter()
                        .map(|slot| slot.map_or(Value::Null, |id| json!(id)))
                        .collect();
                    entry.insert("miso_us".into(), Value::Array(row));
                    if node == NetworkNode::External {
                        entry.insert("root".into(), json!(true));
                    }
                    Value::Object(entry)
                })
                .collect();
            group_map.insert(channel.to_string(), json!({ "nodes": nodes }));
        }
        net.insert(group.to_string(), Value::Object(group_map));
    }
    net.insert("miso_us_uart_map".into(), json!(MISO_US_UART_MAP));
    net.insert("miso_ds_uart_map".into(), json!(MISO_DS_UART_MAP));
    net.insert("mosi_uart_map".into(), json!(MOSI_UART_MAP));

    let mut missing = Map::new();
    for chip in unresolved {
        let group = missing
            .entry(chip.key.io_group.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let channel = group
            .as_object_mut()
            .and_then(|g| {
                Some(
                    g.entry(chip.key.io_channel.to_string())
                        .or_insert_with(|| Value::Object(Map::new())),
                )
            })
            .and_then(Value::as_object_mut);
        if let Some(channel) = channel {
            channel.insert(chip.key.chip_id.to_string(), json!(chip.piso_lanes));
        }
    }

    let doc = TopologyDocument {
        config_type: "controller",
        name,
        asic_version: "2b",
        layout,
        network: Value::Object(net),
        missing: Value::Object(missing),
    };
    serde_json::to_value(doc).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bringup::{attempt_link, TuningParams};
    use crate::run::{setup_root, RootAssignment};
    use crate::sim::SimBus;
    use cascade_chip::ChipKey;

    fn two_chip_tile() -> (Controller<SimBus>, Vec<RootAssignment>) {
        let mut ctrl = Controller::new(SimBus::new().with_chain(1, 1, &[21, 22]));
        let roots = vec![RootAssignment::new(1, 1, 21).with_span(21, 22)];
        let params = TuningParams::default();
        assert!(setup_root(&mut ctrl, &roots[0], &params).unwrap());
        ctrl.select_channel(1, 1);
        let outcome = attempt_link(&mut ctrl, ChipKey::new(1, 1, 21), 22, &params).unwrap();
        ctrl.release_channel();
        assert!(matches!(outcome, crate::bringup::LinkAttempt::Configured { .. }));
        (ctrl, roots)
    }

    #[test]
    fn ext_links_precede_chip_links() {
        let (ctrl, roots) = two_chip_tile();
        let network = build_network(&ctrl, &roots).unwrap();
        let graph = &network.channels[&1][&1];

        assert_eq!(graph.nodes[0], NetworkNode::External);
        assert_eq!(
            graph.miso_us[0],
            LinkEdge { from: NetworkNode::External, to: NetworkNode::Chip(21), lane: 0 }
        );
        // parent 21 → daughter 22 rides PISO-US lane 2 (Δ = −1)
        assert!(graph.miso_us.contains(&LinkEdge {
            from: NetworkNode::Chip(21),
            to: NetworkNode::Chip(22),
            lane: 2,
        }));
    }

    #[test]
    fn miso_us_rows_use_array_positions_not_lanes() {
        let (ctrl, roots) = two_chip_tile();
        let network = build_network(&ctrl, &roots).unwrap();
        let graph = &network.channels[&1][&1];

        // +1 neighbor lands in slot 3; the external row points at the root
        // through the same slot
        assert_eq!(graph.miso_us_row(NetworkNode::Chip(21)), [None, None, None, Some(22)]);
        assert_eq!(graph.miso_us_row(NetworkNode::External), [None, None, None, Some(21)]);
    }

    #[test]
    fn export_shape_and_missing_section() {
        let (ctrl, roots) = two_chip_tile();
        let network = build_network(&ctrl, &roots).unwrap();
        let unresolved = vec![UnresolvedChip {
            key: ChipKey::new(1, 1, 23),
            piso_lanes: vec![2],
        }];
        let doc = export_topology(&network, "tile-1", "2.5.0", &unresolved);

        assert_eq!(doc["_config_type"], "controller");
        assert_eq!(doc["asic_version"], "2b");
        assert_eq!(doc["network"]["miso_us_uart_map"], json!([3, 0, 1, 2]));
        assert_eq!(doc["missing"]["1"]["1"]["23"], json!([2]));

        let nodes = doc["network"]["1"]["1"]["nodes"].as_array().unwrap();
        assert_eq!(nodes[0]["chip_id"], "ext");
        assert_eq!(nodes[0]["root"], true);
        assert_eq!(nodes[1]["chip_id"], 21);
        assert_eq!(nodes[1]["miso_us"], json!([null, null, null, 22]));
    }
}
