//! End-to-end discovery runs against the simulated bus.

use cascade_driver::{
    build_network, export_topology, run_discovery, Controller, Headless, NetworkNode,
    RootAssignment, SimBus, TuningParams,
};
use cascade_chip::ChipKey;
use serde_json::json;

fn discover(
    bus: SimBus,
    roots: &[RootAssignment],
) -> (Controller<SimBus>, cascade_driver::DiscoveryReport) {
    let mut ctrl = Controller::new(bus);
    let report =
        run_discovery(&mut ctrl, roots, &TuningParams::default(), &mut Headless).unwrap();
    (ctrl, report)
}

#[test]
fn four_chip_chain_configures_completely() {
    let bus = SimBus::new().with_chain(1, 1, &[21, 22, 23, 24]);
    let roots = vec![RootAssignment::new(1, 1, 21).with_span(21, 24)];
    let (ctrl, report) = discover(bus, &roots);

    assert_eq!(report.roots, vec![ChipKey::new(1, 1, 21)]);
    assert!(report.unresolved.is_empty());
    assert_eq!(ctrl.chip_count(), 4);
    for id in [21, 22, 23, 24] {
        assert!(ctrl.contains_id(id), "chip {id} missing from working set");
    }

    // the chain rides the +1 column: each parent transmits up on lane 2
    for parent in [21, 22, 23] {
        let cfg = ctrl.config(ChipKey::new(1, 1, parent)).unwrap();
        assert!(cfg.enable_piso_upstream[2], "chip {parent} lane 2 closed");
        assert_eq!(cfg.tx_slices[2], 15);
    }
    // the last chip transmits nothing upstream
    let last = ctrl.config(ChipKey::new(1, 1, 24)).unwrap();
    assert_eq!(last.enable_piso_upstream, [false; 4]);

    // every daughter received its trigger quiescing
    for id in [22, 23, 24] {
        let cfg = ctrl.config(ChipKey::new(1, 1, id)).unwrap();
        assert_eq!(cfg.csa_enable, 0);
        assert_eq!(cfg.channel_mask, u64::MAX);
        assert_eq!(cfg.ref_current_trim, 16);
    }
}

#[test]
fn four_chip_chain_exports_a_linear_topology() {
    let bus = SimBus::new().with_chain(1, 1, &[21, 22, 23, 24]);
    let roots = vec![RootAssignment::new(1, 1, 21).with_span(21, 24)];
    let (ctrl, report) = discover(bus, &roots);

    let network = build_network(&ctrl, &roots).unwrap();
    let graph = &network.channels[&1][&1];
    assert_eq!(
        graph.nodes,
        vec![
            NetworkNode::External,
            NetworkNode::Chip(21),
            NetworkNode::Chip(22),
            NetworkNode::Chip(23),
            NetworkNode::Chip(24),
        ]
    );
    assert_eq!(graph.miso_us_row(NetworkNode::External), [None, None, None, Some(21)]);
    assert_eq!(graph.miso_us_row(NetworkNode::Chip(21)), [None, None, None, Some(22)]);
    assert_eq!(graph.miso_us_row(NetworkNode::Chip(24)), [None; 4]);

    // three chip-to-chip upstream links, all on lane 2, plus the ext link
    let chip_links: Vec<_> = graph
        .miso_us
        .iter()
        .filter(|e| e.from != NetworkNode::External)
        .collect();
    assert_eq!(chip_links.len(), 3);
    assert!(chip_links.iter().all(|e| e.lane == 2));

    let doc = export_topology(&network, "tile-1", "2.5.0", &report.unresolved);
    assert_eq!(doc["_config_type"], "controller");
    assert_eq!(doc["asic_version"], "2b");
    assert_eq!(doc["layout"], "2.5.0");
    assert_eq!(doc["network"]["miso_us_uart_map"], json!([3, 0, 1, 2]));
    assert_eq!(doc["network"]["miso_ds_uart_map"], json!([1, 2, 3, 0]));
    assert_eq!(doc["network"]["mosi_uart_map"], json!([2, 3, 0, 1]));
    assert_eq!(doc["missing"], json!({}));

    let nodes = doc["network"]["1"]["1"]["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 5);
    assert_eq!(nodes[0]["chip_id"], "ext");
    assert_eq!(nodes[0]["root"], true);
    assert_eq!(nodes[2]["chip_id"], 22);
    assert_eq!(nodes[2]["miso_us"], json!([null, null, null, 23]));
}

#[test]
fn dead_chip_stops_the_column_and_is_reported() {
    // 23 never answers; 24 sits behind it with no other live parent
    let bus = SimBus::new().with_chain(1, 1, &[21, 22, 24]);
    let roots = vec![RootAssignment::new(1, 1, 21).with_span(21, 24)];
    let (ctrl, report) = discover(bus, &roots);

    assert_eq!(ctrl.chip_count(), 2);
    assert!(ctrl.contains_id(21));
    assert!(ctrl.contains_id(22));
    assert!(!ctrl.contains_id(23));
    assert!(!ctrl.contains_id(24));

    // 22's link toward 23 was rolled back: transmit lane closed with
    // quiescent trims, receive lane back to parent-only
    let cfg = ctrl.config(ChipKey::new(1, 1, 22)).unwrap();
    assert!(!cfg.enable_piso_upstream[2]);
    assert_eq!(cfg.i_tx_diff[2], 15);
    assert_eq!(cfg.tx_slices[2], 0);
    assert_eq!(cfg.enable_posi, [false, true, false, false]);

    // 23 was attempted from 22 (daughter PISO-DS lane 0); 24 had no
    // configured parent left to try
    assert_eq!(report.unresolved.len(), 2);
    assert_eq!(report.unresolved[0].key, ChipKey::new(1, 1, 23));
    assert_eq!(report.unresolved[0].piso_lanes, vec![0]);
    assert_eq!(report.unresolved[1].key, ChipKey::new(1, 1, 24));
    assert!(report.unresolved[1].piso_lanes.is_empty());

    let network = build_network(&ctrl, &roots).unwrap();
    let doc = export_topology(&network, "tile-1", "2.5.0", &report.unresolved);
    assert_eq!(doc["missing"]["1"]["1"]["23"], json!([0]));
    assert_eq!(doc["missing"]["1"]["1"]["24"], json!([]));
    let nodes = doc["network"]["1"]["1"]["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
}

#[test]
fn row_neighbor_rescues_a_chip_behind_a_dead_column_link() {
    // 23 is dead but the row above is alive: the walk reaches 32 while
    // probing the −10 row from 22 and then bails at 23; the fixpoint
    // chains 33 and 34 off 32 over successive passes and finally brings
    // 24 up through 34.
    let bus = SimBus::new().with_chain(1, 1, &[21, 22, 24, 32, 33, 34]);
    let roots = vec![RootAssignment::new(1, 1, 21).with_span(21, 34)];
    let (ctrl, report) = discover(bus, &roots);

    for id in [21, 22, 32, 33, 34, 24] {
        assert!(ctrl.contains_id(id), "chip {id} missing from working set");
    }
    let unresolved_ids: Vec<u8> = report.unresolved.iter().map(|u| u.key.chip_id).collect();
    assert!(unresolved_ids.contains(&23));
    assert!(!unresolved_ids.contains(&24));

    // 24's parent sits at +10, so it listens on POSI lane 2
    let cfg = ctrl.config(ChipKey::new(1, 1, 24)).unwrap();
    assert_eq!(cfg.enable_posi, [false, false, true, false]);
}

#[test]
fn dead_root_leaves_its_whole_span_unresolved() {
    let bus = SimBus::new().with_chain(1, 1, &[22, 23]);
    let roots = vec![RootAssignment::new(1, 1, 21).with_span(21, 23)];
    let (ctrl, report) = discover(bus, &roots);

    assert!(report.roots.is_empty());
    assert_eq!(ctrl.chip_count(), 0);
    let ids: Vec<u8> = report.unresolved.iter().map(|u| u.key.chip_id).collect();
    assert_eq!(ids, vec![21, 22, 23]);
}

#[test]
fn two_channels_discover_independently() {
    let bus = SimBus::new().with_chain(1, 1, &[21, 22]).with_chain(1, 2, &[41, 42]);
    let roots = vec![
        RootAssignment::new(1, 1, 21).with_span(21, 22),
        RootAssignment::new(1, 2, 41).with_span(41, 42),
    ];
    let (ctrl, report) = discover(bus, &roots);

    assert_eq!(report.roots.len(), 2);
    assert!(report.unresolved.is_empty());
    assert_eq!(ctrl.chip_count(), 4);
    assert!(ctrl.contains_id(42));

    let network = build_network(&ctrl, &roots).unwrap();
    assert_eq!(network.channels[&1].len(), 2);
    let ch2 = &network.channels[&1][&2];
    assert_eq!(ch2.miso_us_row(NetworkNode::External), [None, None, None, Some(41)]);
    // each channel carries exactly one ext command link
    let ext_mosi = ch2
        .mosi
        .iter()
        .filter(|e| e.from == NetworkNode::External)
        .count();
    assert_eq!(ext_mosi, 1);
}

#[test]
fn flaky_register_is_absorbed_by_reconciliation() {
    let key = ChipKey::new(1, 1, 22);
    let bus = SimBus::new()
        .with_chain(1, 1, &[21, 22])
        .with_flaky_register(key, cascade_chip::config::REG_ENABLE_POSI, 1);
    let roots = vec![RootAssignment::new(1, 1, 21).with_span(21, 22)];
    let (ctrl, report) = discover(bus, &roots);

    assert!(report.unresolved.is_empty());
    assert_eq!(ctrl.chip_count(), 2);
}

#[test]
fn stuck_register_fails_the_chip_cleanly() {
    let key = ChipKey::new(1, 1, 22);
    let bus = SimBus::new()
        .with_chain(1, 1, &[21, 22])
        .with_stuck_register(key, cascade_chip::config::REG_ENABLE_POSI, 0xff);
    let roots = vec![RootAssignment::new(1, 1, 21).with_span(21, 22)];
    let (ctrl, report) = discover(bus, &roots);

    assert!(!ctrl.contains_id(22));
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].key.chip_id, 22);
}
