use std::path::PathBuf;

use test_log::test;

use crate::*;

pub const TEST_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../tests/data");

#[inline]
pub fn test_data(file_name: &str) -> PathBuf {
    PathBuf::from(TEST_DATA_DIR).join(file_name)
}

#[test]
fn parse_golden() {
    let doc = Parser::parse_file(Dialect::Spice, test_data("netlists/golden.sp")).unwrap();
    assert_eq!(doc.name(), "golden.sp");
    assert_eq!(doc.subckt_names(), vec!["inv", "amp", "adc"]);
    assert_eq!(doc.globals(), &["vdd"]);
    assert!(doc.is_global("VDD"));
    assert!(doc.is_global("0"));
    assert!(!doc.is_global("vss"));

    let top = doc.top_instances();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].name, "X_ADC");
    assert_eq!(top[0].master.subckt_name().unwrap(), "adc");

    let amp = doc.subckt("AMP").unwrap();
    assert_eq!(amp.ports, vec!["vin", "vout", "vdd", "vss"]);
    assert_eq!(amp.nets(), vec!["vin", "vout", "vdd", "vss", "mid"]);
    assert_eq!(amp.port_index("vdd"), Some(2));
    let c1 = amp.instance("C1").unwrap();
    assert_eq!(c1.master.to_string(), "<cap>");
    assert_eq!(c1.params.get("value").unwrap(), "1p");
}

#[test]
fn parse_spectre_file() {
    let path = test_data("netlists/adc.scs");
    let text = std::fs::read_to_string(&path).unwrap();
    let dialect = Dialect::detect(Some(path.as_path()), &text);
    assert_eq!(dialect, Dialect::Spectre);

    let doc = Parser::parse_file(dialect, &path).unwrap();
    assert_eq!(doc.subckt_names(), vec!["inv", "amp", "adc"]);
    assert_eq!(doc.subckt("adc").unwrap().ports.len(), 4);
    assert_eq!(doc.top_instances().len(), 1);
    assert!(doc.is_global("vdd"));

    let inv = doc.subckt("inv").unwrap();
    assert_eq!(inv.instances[0].connections, vec!["out", "in", "vdd", "vdd"]);
    assert_eq!(inv.instances[0].master.to_string(), "<mos:pmos>");
    let amp = doc.subckt("amp").unwrap();
    assert_eq!(amp.instance("C1").unwrap().master.to_string(), "<cap>");
    assert_eq!(inv.instances[0].params.get("w").unwrap(), "2u");
}

#[test]
fn spice_and_spectre_views_agree() {
    let spice = Parser::parse_file(Dialect::Spice, test_data("netlists/golden.sp")).unwrap();
    let spectre = Parser::parse_file(Dialect::Spectre, test_data("netlists/adc.scs")).unwrap();
    for def in spice.subckts() {
        let other = spectre.subckt(&def.name).unwrap();
        assert_eq!(def.ports, other.ports);
        let names = |d: &SubcircuitDef| d.instances.iter().map(|i| i.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(def), names(other));
        let masters = |d: &SubcircuitDef| d.instances.iter().map(|i| i.master.clone()).collect::<Vec<_>>();
        assert_eq!(masters(def), masters(other));
    }
}

#[test]
fn spectre_models_from_includes() {
    let doc = Parser::parse_file(Dialect::Spectre, test_data("netlists/with_models.scs")).unwrap();
    let cell = doc.subckt("cell").unwrap();
    assert_eq!(cell.instance("M0").unwrap().master.to_string(), "<mos:pch>");
    assert_eq!(cell.instance("D0").unwrap().master.to_string(), "<diode:dio>");
}

#[test]
fn follows_includes() {
    let doc = Parser::parse_file(Dialect::Spice, test_data("netlists/with_include.sp")).unwrap();
    assert_eq!(doc.subckt_names(), vec!["buf", "top"]);
    assert_eq!(
        doc.subckt("top").unwrap().instances[0].master,
        Master::Subckt { name: "buf".into() }
    );
}

#[test]
fn includes_are_skipped_without_origin() {
    let text = std::fs::read_to_string(test_data("netlists/with_include.sp")).unwrap();
    let err = parse(text, Dialect::Spice).unwrap_err();
    assert!(matches!(err, ParserError::UndefinedReference { .. }));
}

#[test]
fn undefined_reference_in_file() {
    let err = Parser::parse_file(Dialect::Spice, test_data("netlists/undefined.sp")).unwrap_err();
    match err {
        ParserError::UndefinedReference { instance, master } => {
            assert_eq!(instance, "X_AMP");
            assert_eq!(master, "amp_v2");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_file() {
    let err = Parser::parse_file(Dialect::Spice, test_data("netlists/nonexistent.sp")).unwrap_err();
    assert!(matches!(err, ParserError::FailedToRead { .. }));
}

#[test]
fn uninstantiated_subckts() {
    let doc = Parser::parse_file(Dialect::Spice, test_data("netlists/golden.sp")).unwrap();
    let roots = doc
        .uninstantiated_subckts()
        .into_iter()
        .map(|s| s.name.clone())
        .collect::<Vec<_>>();
    assert_eq!(roots, vec!["adc"]);
}

#[test]
fn device_terminals() {
    assert_eq!(DeviceKind::from_letter('m'), Some(DeviceKind::Mos));
    assert_eq!(DeviceKind::from_letter('x'), None);
    assert_eq!(DeviceKind::Mos.terminals(), Some(4));
    assert_eq!(DeviceKind::Bjt.terminals(), None);
    assert!(DeviceKind::Diode.takes_model());
    assert!(!DeviceKind::Res.takes_model());
}

#[test]
fn fold_names() {
    assert_eq!(fold_name("AmP"), "amp");
    assert_eq!(fold_name("amp"), "amp");
}
