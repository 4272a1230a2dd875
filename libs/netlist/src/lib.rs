//! Circuit netlist documents.
//!
//! A [`NetlistDocument`] owns every [`SubcircuitDef`] of a parsed netlist along with
//! the netlist's top-level [`Instance`]s. Instances refer to their master by name:
//! a definition is stored once in the document and looked up by every site that
//! instantiates it.
//!
//! Subcircuit names are matched case-insensitively. The name as written at the
//! definition site is preserved for display.
#![warn(missing_docs)]

use std::fmt::Display;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::Serialize;

pub mod parser;

pub use parser::{Dialect, ParseDialectError, Parser, ParserError};

#[cfg(test)]
mod tests;

/// Parses `text` as a netlist in the given dialect.
///
/// Shorthand for [`Parser::parse`].
pub fn parse(text: impl Into<ArcStr>, dialect: Dialect) -> Result<NetlistDocument, ParserError> {
    Parser::parse(dialect, text)
}

/// Folds a subcircuit name into the key used for lookups.
pub fn fold_name(name: &str) -> ArcStr {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        ArcStr::from(name.to_ascii_lowercase())
    } else {
        ArcStr::from(name)
    }
}

/// A parsed netlist.
///
/// Immutable once built by the [`Parser`].
#[derive(Debug, Clone, Serialize)]
pub struct NetlistDocument {
    name: ArcStr,
    dialect: Dialect,
    subckts: IndexMap<ArcStr, SubcircuitDef>,
    top: Vec<Instance>,
    globals: Vec<ArcStr>,
}

/// A reusable subcircuit definition.
#[derive(Debug, Clone, Serialize)]
pub struct SubcircuitDef {
    /// The subcircuit name, as written at its definition.
    pub name: ArcStr,
    /// The ordered port list.
    pub ports: Vec<ArcStr>,
    /// The instances and primitive devices inside the definition, in source order.
    pub instances: Vec<Instance>,
    /// Default parameter values.
    pub params: Params,
    /// The source line of the definition header.
    pub line: usize,
}

/// An instantiation site: a subcircuit instance or a primitive device.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Instance {
    /// The local instance name, unique among its siblings.
    pub name: ArcStr,
    /// What this instance instantiates.
    pub master: Master,
    /// The nets connected to the master's ports, in port order.
    pub connections: Vec<ArcStr>,
    /// Local parameter overrides.
    pub params: Params,
    /// The source line of the instance statement.
    pub line: usize,
}

/// The master of an [`Instance`].
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Master {
    /// A subcircuit defined in the same document, referenced by name.
    Subckt {
        /// The subcircuit name, as written at its definition.
        name: ArcStr,
    },
    /// A primitive device.
    Primitive(Primitive),
}

/// A primitive device master.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct Primitive {
    /// The kind of device.
    pub kind: DeviceKind,
    /// The device model, if the device names one.
    pub model: Option<ArcStr>,
}

/// Kinds of primitive devices.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// A MOSFET (`M`).
    Mos,
    /// A resistor (`R`).
    Res,
    /// A capacitor (`C`).
    Cap,
    /// An inductor (`L`).
    Ind,
    /// A diode (`D`).
    Diode,
    /// A bipolar junction transistor (`Q`).
    Bjt,
    /// A JFET (`J`).
    Jfet,
    /// An independent voltage source (`V`).
    Vsource,
    /// An independent current source (`I`).
    Isource,
    /// A voltage-controlled voltage source (`E`).
    Vcvs,
    /// A current-controlled current source (`F`).
    Cccs,
    /// A voltage-controlled current source (`G`).
    Vccs,
    /// A current-controlled voltage source (`H`).
    Ccvs,
    /// A behavioral source (`B`).
    Behavioral,
    /// Mutual inductance (`K`).
    Coupling,
    /// A simulator built-in or model reference without a type letter.
    ///
    /// Spectre instances whose master is not a subcircuit of the document take this kind.
    Device,
}

/// Parameter values, in source order.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params {
    values: IndexMap<ArcStr, ArcStr>,
}

impl NetlistDocument {
    pub(crate) fn new(
        name: ArcStr,
        dialect: Dialect,
        subckts: IndexMap<ArcStr, SubcircuitDef>,
        top: Vec<Instance>,
        globals: Vec<ArcStr>,
    ) -> Self {
        Self {
            name,
            dialect,
            subckts,
            top,
            globals,
        }
    }

    /// The name of the netlist.
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The dialect the netlist was parsed as.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Looks up a subcircuit by name.
    pub fn subckt(&self, name: &str) -> Option<&SubcircuitDef> {
        self.subckts.get(fold_name(name).as_str())
    }

    /// Iterates over all subcircuit definitions in document order.
    pub fn subckts(&self) -> impl Iterator<Item = &SubcircuitDef> {
        self.subckts.values()
    }

    /// The number of subcircuit definitions.
    pub fn num_subckts(&self) -> usize {
        self.subckts.len()
    }

    /// The names of all subcircuits in document order.
    pub fn subckt_names(&self) -> Vec<ArcStr> {
        self.subckts.values().map(|s| s.name.clone()).collect()
    }

    /// Instances declared outside any subcircuit.
    pub fn top_instances(&self) -> &[Instance] {
        &self.top
    }

    /// Nets declared global.
    pub fn globals(&self) -> &[ArcStr] {
        &self.globals
    }

    /// Returns `true` if `net` is global.
    ///
    /// Nets ending in `!`, the ground node `0`, and nets named by a global
    /// declaration are global.
    pub fn is_global(&self, net: &str) -> bool {
        net == "0"
            || net.ends_with('!')
            || self.globals.iter().any(|g| g.eq_ignore_ascii_case(net))
    }

    /// Subcircuits that no subcircuit instantiates, in document order.
    ///
    /// Instantiations from top-level instances are not counted.
    pub fn uninstantiated_subckts(&self) -> Vec<&SubcircuitDef> {
        let mut used = std::collections::HashSet::new();
        for def in self.subckts.values() {
            for inst in def.instances.iter() {
                if let Master::Subckt { name } = &inst.master {
                    used.insert(fold_name(name));
                }
            }
        }
        self.subckts
            .iter()
            .filter(|(key, _)| !used.contains(*key))
            .map(|(_, def)| def)
            .collect()
    }
}

impl SubcircuitDef {
    /// The position of `net` in the port list, if it is a port.
    pub fn port_index(&self, net: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.as_str() == net)
    }

    /// All nets of the definition: ports first, then internal nets in order of first use.
    pub fn nets(&self) -> Vec<ArcStr> {
        let mut nets: Vec<ArcStr> = self.ports.clone();
        for inst in self.instances.iter() {
            for net in inst.connections.iter() {
                if !nets.contains(net) {
                    nets.push(net.clone());
                }
            }
        }
        nets
    }

    /// Looks up a child instance by local name.
    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name.as_str() == name)
    }
}

impl Instance {
    /// Returns `true` if this instance instantiates a subcircuit.
    pub fn is_subckt(&self) -> bool {
        matches!(self.master, Master::Subckt { .. })
    }
}

impl Master {
    /// The name of the subcircuit, if this is a subcircuit master.
    pub fn subckt_name(&self) -> Option<&ArcStr> {
        match self {
            Self::Subckt { name } => Some(name),
            Self::Primitive(_) => None,
        }
    }
}

impl Display for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subckt { name } => write!(f, "{name}"),
            Self::Primitive(Primitive { kind, model: None }) => write!(f, "<{kind}>"),
            Self::Primitive(Primitive {
                kind,
                model: Some(model),
            }) => write!(f, "<{kind}:{model}>"),
        }
    }
}

impl DeviceKind {
    /// The device kind for a SPICE element type letter.
    pub fn from_letter(c: char) -> Option<Self> {
        Some(match c.to_ascii_uppercase() {
            'M' => Self::Mos,
            'R' => Self::Res,
            'C' => Self::Cap,
            'L' => Self::Ind,
            'D' => Self::Diode,
            'Q' => Self::Bjt,
            'J' => Self::Jfet,
            'V' => Self::Vsource,
            'I' => Self::Isource,
            'E' => Self::Vcvs,
            'F' => Self::Cccs,
            'G' => Self::Vccs,
            'H' => Self::Ccvs,
            'B' => Self::Behavioral,
            'K' => Self::Coupling,
            _ => return None,
        })
    }

    /// The device kind of a Spectre built-in primitive such as `resistor`.
    pub fn from_spectre_primitive(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "resistor" => Self::Res,
            "capacitor" => Self::Cap,
            "inductor" => Self::Ind,
            "mutual_inductor" => Self::Coupling,
            "diode" => Self::Diode,
            "vsource" => Self::Vsource,
            "isource" => Self::Isource,
            "vcvs" => Self::Vcvs,
            "vccs" => Self::Vccs,
            "cccs" => Self::Cccs,
            "ccvs" => Self::Ccvs,
            "bsource" => Self::Behavioral,
            _ => return None,
        })
    }

    /// The kind of device instantiating a Spectre `model` of the given type.
    pub fn from_model_type(ty: &str) -> Option<Self> {
        let ty = ty.to_ascii_lowercase();
        if let Some(kind) = Self::from_spectre_primitive(&ty) {
            return Some(kind);
        }
        const MOS: [&str; 6] = ["bsim", "mos", "psp", "hisim", "ekv", "b3soi"];
        if MOS.iter().any(|p| ty.starts_with(p)) {
            return Some(Self::Mos);
        }
        Some(match ty.as_str() {
            "bjt" | "bjt504" | "vbic" | "hbt" | "hicum" | "mextram" => Self::Bjt,
            "jfet" => Self::Jfet,
            _ => return None,
        })
    }

    /// The number of terminals a SPICE element of this kind connects.
    ///
    /// Returns [`None`] for kinds whose terminal count varies.
    pub fn terminals(&self) -> Option<usize> {
        match self {
            Self::Mos | Self::Vcvs | Self::Vccs => Some(4),
            Self::Jfet => Some(3),
            Self::Res
            | Self::Cap
            | Self::Ind
            | Self::Diode
            | Self::Vsource
            | Self::Isource
            | Self::Cccs
            | Self::Ccvs
            | Self::Behavioral => Some(2),
            Self::Coupling => Some(0),
            Self::Bjt | Self::Device => None,
        }
    }

    /// Returns `true` if the element's trailing token names a model rather than a value.
    pub fn takes_model(&self) -> bool {
        matches!(self, Self::Mos | Self::Diode | Self::Bjt | Self::Jfet)
    }
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Mos => "mos",
            Self::Res => "res",
            Self::Cap => "cap",
            Self::Ind => "ind",
            Self::Diode => "diode",
            Self::Bjt => "bjt",
            Self::Jfet => "jfet",
            Self::Vsource => "vsource",
            Self::Isource => "isource",
            Self::Vcvs => "vcvs",
            Self::Cccs => "cccs",
            Self::Vccs => "vccs",
            Self::Ccvs => "ccvs",
            Self::Behavioral => "behavioral",
            Self::Coupling => "coupling",
            Self::Device => "device",
        };
        write!(f, "{s}")
    }
}

impl Params {
    /// Create a new, empty parameter set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key-value pair into the parameter set.
    pub fn insert(&mut self, k: impl Into<ArcStr>, v: impl Into<ArcStr>) {
        self.values.insert(k.into(), v.into());
    }

    /// Get the value corresponding to the given key.
    pub fn get(&self, k: &str) -> Option<&ArcStr> {
        self.values.get(k)
    }

    /// An iterator over all key-value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, &ArcStr)> {
        self.values.iter()
    }

    /// The number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copies every entry of `other` into `self`, overwriting existing keys.
    pub fn extend(&mut self, other: Params) {
        self.values.extend(other.values);
    }
}
