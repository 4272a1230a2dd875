//! Rename-invariant node signatures.
//!
//! A signature captures where a node sits in the hierarchy without reference to
//! any instance name: the masters of its ancestors, its own master, and how each
//! of its connections relates to the enclosing definition.

use std::fmt::Display;

use arcstr::ArcStr;
use netlist::{fold_name, DeviceKind, Instance, Master, NetlistDocument, SubcircuitDef};
use serde::Serialize;

/// The identity of an instance master.
///
/// Subcircuit names are folded to lower case; so are device model names.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterKey {
    /// A subcircuit master.
    Subckt {
        /// The folded subcircuit name.
        name: ArcStr,
    },
    /// A primitive device master.
    Primitive {
        /// The kind of device.
        kind: DeviceKind,
        /// The folded model name.
        model: Option<ArcStr>,
    },
}

impl MasterKey {
    /// The key of the given master.
    pub fn of(master: &Master) -> Self {
        match master {
            Master::Subckt { name } => Self::Subckt {
                name: fold_name(name),
            },
            Master::Primitive(p) => Self::Primitive {
                kind: p.kind,
                model: p.model.as_deref().map(fold_name),
            },
        }
    }
}

impl Display for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subckt { name } => write!(f, "{name}"),
            Self::Primitive { kind, model: None } => write!(f, "<{kind}>"),
            Self::Primitive {
                kind,
                model: Some(model),
            } => write!(f, "<{kind}:{model}>"),
        }
    }
}

/// How a connected net relates to the definition enclosing an instance.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortClass {
    /// The net is the port of the enclosing definition at the given position.
    Boundary(usize),
    /// The net is global.
    Global,
    /// The net is local to the enclosing definition.
    Internal,
}

/// The part of a [`Signature`] that takes part in structural matching.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct SignatureKey {
    /// The masters of every ancestor node, from the root down to the parent.
    pub ancestors: Vec<MasterKey>,
    /// The node's own master.
    pub master: MasterKey,
    /// The class of every connection, in port order.
    pub ports: Vec<PortClass>,
}

/// A rename-invariant structural fingerprint of a hierarchy node.
#[derive(Debug, Clone, Serialize)]
pub struct Signature {
    /// The matching key.
    pub key: SignatureKey,
    /// The position of the node among its siblings that share its master.
    ///
    /// Instance order is not stable across independently authored netlists, so the
    /// ordinal does not take part in equality.
    pub sibling_ordinal: usize,
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Signature {}

impl Signature {
    /// The number of connections of the node.
    pub fn arity(&self) -> usize {
        self.key.ports.len()
    }
}

/// The local part of the signatures of every instance inside one definition.
///
/// Computed once per definition and shared by every site that expands it.
#[derive(Debug, Clone)]
pub(crate) struct LocalSignatures {
    pub(crate) masters: Vec<MasterKey>,
    pub(crate) ports: Vec<Vec<PortClass>>,
    pub(crate) ordinals: Vec<usize>,
}

impl LocalSignatures {
    /// Computes local signatures for `instances`, enclosed by `scope`.
    ///
    /// Top-level instances have no enclosing definition.
    pub(crate) fn compute(
        doc: &NetlistDocument,
        scope: Option<&SubcircuitDef>,
        instances: &[Instance],
    ) -> Self {
        let masters: Vec<MasterKey> = instances.iter().map(|i| MasterKey::of(&i.master)).collect();
        let ports = instances
            .iter()
            .map(|inst| {
                inst.connections
                    .iter()
                    .map(|net| classify(doc, scope, net))
                    .collect()
            })
            .collect();
        let ordinals = masters
            .iter()
            .enumerate()
            .map(|(i, m)| masters[..i].iter().filter(|other| *other == m).count())
            .collect();
        Self {
            masters,
            ports,
            ordinals,
        }
    }
}

fn classify(doc: &NetlistDocument, scope: Option<&SubcircuitDef>, net: &str) -> PortClass {
    if let Some(idx) = scope.and_then(|s| s.port_index(net)) {
        PortClass::Boundary(idx)
    } else if doc.is_global(net) {
        PortClass::Global
    } else {
        PortClass::Internal
    }
}
