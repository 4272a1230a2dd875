use std::path::PathBuf;
use std::sync::Arc;

use netlist::{Dialect, Parser};
use test_log::test;

use super::*;

pub const TEST_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../tests/data");

#[inline]
pub fn test_data(file_name: &str) -> PathBuf {
    PathBuf::from(TEST_DATA_DIR).join(file_name)
}

fn graph(file_name: &str) -> HierarchyGraph {
    let doc = Parser::parse_file(Dialect::Spice, test_data(file_name)).unwrap();
    build(Arc::new(doc), Roots::Auto).unwrap()
}

fn graph_str(text: &str, roots: Roots) -> Result<HierarchyGraph, BuildError> {
    let doc = Parser::parse(Dialect::Spice, text).unwrap();
    build(Arc::new(doc), roots)
}

#[test]
fn golden_paths() {
    let g = graph("netlists/golden.sp");
    // X_ADC, X_AMP, R1, two inverters with two devices each, C1
    assert_eq!(g.len(), 10);
    assert_eq!(g.roots().len(), 1);

    let inv1 = g.find("X_ADC/X_AMP/X_INV1").unwrap();
    let node = g.node(inv1);
    assert_eq!(node.path(), "X_ADC/X_AMP/X_INV1");
    assert_eq!(node.name(), "X_INV1");
    assert_eq!(node.depth(), 2);
    assert_eq!(node.scope().unwrap(), "amp");
    assert_eq!(node.children().len(), 2);
    assert_eq!(g.definition(inv1).unwrap().name, "inv");
    assert_eq!(g.scope_definition(inv1).unwrap().name, "amp");
    assert_eq!(g.segments(inv1), vec!["X_ADC", "X_AMP", "X_INV1"]);

    let amp = g.find("X_ADC/X_AMP").unwrap();
    assert_eq!(node.parent(), Some(amp));
    assert!(g.is_descendant(inv1, amp));
    assert!(!g.is_descendant(amp, inv1));
    assert_eq!(g.descendants(amp).len(), 7);

    let siblings = g.siblings(inv1).map(|s| g.node(s).name().clone()).collect::<Vec<_>>();
    assert_eq!(siblings, vec!["X_INV2", "C1"]);
}

#[test]
fn path_lookup_is_lenient() {
    let g = graph("netlists/golden.sp");
    let id = g.find("X_ADC/X_AMP").unwrap();
    assert_eq!(g.find("/X_ADC/X_AMP/"), Some(id));
    assert_eq!(g.find("x_adc/x_amp"), Some(id));
    assert_eq!(g.find("X_ADC/X_MISSING"), None);
    assert_eq!(g.find(""), None);
}

#[test]
fn find_net_suffix() {
    let g = graph("netlists/golden.sp");
    let (id, net) = g.find_net("X_ADC/X_AMP/mid").unwrap();
    assert_eq!(g.node(id).path(), "X_ADC/X_AMP");
    assert_eq!(net, "mid");
    let (_, net) = g.find_net("X_ADC/X_AMP/VIN").unwrap();
    assert_eq!(net, "vin");
    assert!(g.find_net("X_ADC/X_AMP/nothing").is_none());
    assert!(g.find_net("vin").is_none());
}

#[test]
fn signatures_ignore_instance_names() {
    let golden = graph("netlists/golden.sp");
    let renamed = graph("netlists/renamed.sp");
    for (g, t) in [
        ("X_ADC", "X_ADC"),
        ("X_ADC/X_AMP", "X_ADC/X_AMPLIFIER"),
        ("X_ADC/X_AMP/X_INV1", "X_ADC/X_AMPLIFIER/XU1"),
        ("X_ADC/X_AMP/X_INV2", "X_ADC/X_AMPLIFIER/XU2"),
        ("X_ADC/X_AMP/X_INV1/M1", "X_ADC/X_AMPLIFIER/XU1/MP1"),
        ("X_ADC/R1", "X_ADC/R_OUT"),
    ] {
        let g = golden.node(golden.find(g).unwrap()).signature();
        let tid = renamed.find(t).unwrap();
        assert_eq!(g, renamed.node(tid).signature());
        assert!(renamed.with_signature(&g.key).contains(&tid));
    }
}

#[test]
fn signature_contents() {
    let g = graph("netlists/golden.sp");
    let sig = g.node(g.find("X_ADC/X_AMP/X_INV2").unwrap()).signature();
    assert_eq!(
        sig.key.ancestors,
        vec![
            MasterKey::Subckt { name: "adc".into() },
            MasterKey::Subckt { name: "amp".into() },
        ]
    );
    assert_eq!(sig.key.master, MasterKey::Subckt { name: "inv".into() });
    assert_eq!(
        sig.key.ports,
        vec![
            PortClass::Internal,
            PortClass::Boundary(1),
            PortClass::Boundary(2),
            PortClass::Boundary(3),
        ]
    );
    assert_eq!(sig.sibling_ordinal, 1);
    assert_eq!(sig.arity(), 4);

    let top = g.node(g.find("X_ADC").unwrap()).signature();
    assert_eq!(
        top.key.ports,
        vec![
            PortClass::Internal,
            PortClass::Internal,
            PortClass::Global,
            PortClass::Global,
        ]
    );
}

#[test]
fn symmetric_pair_shares_signature() {
    let g = graph("netlists/symmetric.sp");
    let left = g.node(g.find("X_LOAD/XLEFT").unwrap()).signature();
    let right = g.node(g.find("X_LOAD/XRIGHT").unwrap()).signature();
    assert_eq!(left, right);
    assert_ne!(left.sibling_ordinal, right.sibling_ordinal);
    assert_eq!(g.with_signature(&left.key).len(), 2);
}

#[test]
fn shared_definitions_get_distinct_nodes() {
    let g = graph("netlists/golden.sp");
    let a = g.find("X_ADC/X_AMP/X_INV1/M1").unwrap();
    let b = g.find("X_ADC/X_AMP/X_INV2/M1").unwrap();
    assert_ne!(a, b);
    assert_eq!(g.node(a).instance(), g.node(b).instance());
}

#[test]
fn cyclic_hierarchy() {
    let doc = Parser::parse_file(Dialect::Spice, test_data("netlists/cyclic.sp")).unwrap();
    let err = build(Arc::new(doc), Roots::Auto).unwrap_err();
    assert_eq!(
        err,
        BuildError::CyclicHierarchy {
            chain: vec!["ping".into(), "pong".into(), "ping".into()]
        }
    );
    assert_eq!(err.to_string(), "cyclic hierarchy: ping -> pong -> ping");
}

#[test]
fn self_instantiation_is_cyclic() {
    let err = graph_str(".subckt a x\nX0 x a\n.ends\nXTOP n a\n", Roots::Auto).unwrap_err();
    assert!(matches!(err, BuildError::CyclicHierarchy { .. }));
}

#[test]
fn single_top_cell_is_root_scope() {
    let g = graph_str(
        ".subckt inv a y\nM1 y a 0 0 nch\n.ends\n.subckt buf a y\nX0 a m inv\nX1 m y inv\n.ends\n",
        Roots::Auto,
    )
    .unwrap();
    assert_eq!(g.root_scope().unwrap().name, "buf");
    assert!(g.find("X0/M1").is_some());
    assert_eq!(
        g.node(g.find("X1").unwrap()).signature().key.ports,
        vec![PortClass::Internal, PortClass::Boundary(1)]
    );
}

#[test]
fn several_top_cells_become_synthetic_roots() {
    let g = graph_str(
        ".subckt a x\nR1 x 0 1\n.ends\n.subckt b y\nR1 y 0 1\n.ends\n",
        Roots::Auto,
    )
    .unwrap();
    assert_eq!(g.roots().len(), 2);
    assert!(g.find("a/R1").is_some());
    assert!(g.find("b/R1").is_some());
    assert!(g.root_scope().is_none());
}

#[test]
fn explicit_roots() {
    let text = ".subckt inv a y\nM1 y a 0 0 nch\n.ends\nX0 in out inv\n";
    let g = graph_str(text, Roots::Subckt("INV".into())).unwrap();
    assert_eq!(g.len(), 1);
    assert!(g.find("M1").is_some());

    let g = graph_str(text, Roots::TopLevel).unwrap();
    assert!(g.find("X0/M1").is_some());

    let err = graph_str(text, Roots::Subckt("nand".into())).unwrap_err();
    assert_eq!(err, BuildError::UnknownRoot("nand".into()));
}

#[test]
fn custom_separator() {
    let doc = Parser::parse_file(Dialect::Spice, test_data("netlists/golden.sp")).unwrap();
    let g = HierarchyGraph::build(
        Arc::new(doc),
        BuildOptions {
            separator: '.',
            roots: Roots::Auto,
        },
    )
    .unwrap();
    let id = g.find("X_ADC.X_AMP.C1").unwrap();
    assert_eq!(g.node(id).path(), "X_ADC.X_AMP.C1");
    assert_eq!(g.split_path(".X_ADC.X_AMP."), vec!["X_ADC", "X_AMP"]);
    assert!(g.find("X_ADC/X_AMP").is_none());
}
