//! Convert parsed netlist ASTs into [`NetlistDocument`]s.
//!
//! Masters are resolved against the full set of subcircuits in the file, so
//! instances may reference subcircuits defined later in the netlist.

use std::collections::HashSet;

use arcstr::ArcStr;
use indexmap::IndexMap;

use crate::{fold_name, DeviceKind, Instance, Master, NetlistDocument, Primitive, SubcircuitDef};

use super::{Ast, Component, Dialect, Elem, ParserError, RawMaster, Subckt};

/// A netlist conversion result.
pub(crate) type ConvResult<T> = std::result::Result<T, ParserError>;

/// Builds a [`NetlistDocument`] from a parsed AST.
pub(crate) struct DocumentBuilder {
    name: ArcStr,
    dialect: Dialect,
    ast: Ast,
    /// Port counts of every subcircuit, keyed by folded name.
    ports: IndexMap<ArcStr, (ArcStr, usize)>,
}

impl DocumentBuilder {
    pub(crate) fn new(name: ArcStr, dialect: Dialect, ast: Ast) -> Self {
        Self {
            name,
            dialect,
            ast,
            ports: IndexMap::new(),
        }
    }

    /// Consumes the builder, yielding a [`NetlistDocument`].
    pub(crate) fn build(mut self) -> ConvResult<NetlistDocument> {
        self.map_subckts()?;
        let elems = std::mem::take(&mut self.ast.elems);
        let mut subckts = IndexMap::with_capacity(self.ports.len());
        let mut top = Vec::new();
        for elem in elems {
            match elem {
                Elem::Subckt(s) => {
                    let def = self.convert_subckt(s)?;
                    subckts.insert(fold_name(&def.name), def);
                }
                Elem::Component(c) => {
                    if top.iter().any(|i: &Instance| i.name == c.name) {
                        return Err(duplicate_instance(&c, "top level"));
                    }
                    top.push(self.convert_component(c)?);
                }
            }
        }
        tracing::debug!(
            name = %self.name,
            subckts = subckts.len(),
            top = top.len(),
            "built netlist document"
        );
        let mut globals: Vec<ArcStr> = Vec::new();
        for net in std::mem::take(&mut self.ast.globals) {
            if !globals.iter().any(|g| g.eq_ignore_ascii_case(&net)) {
                globals.push(net);
            }
        }
        Ok(NetlistDocument::new(
            self.name,
            self.dialect,
            subckts,
            top,
            globals,
        ))
    }

    fn map_subckts(&mut self) -> ConvResult<()> {
        for elem in self.ast.elems.iter() {
            let Elem::Subckt(s) = elem else {
                continue;
            };
            let key = fold_name(&s.name);
            if let Some((prev, _)) = self.ports.get(&key) {
                return Err(ParserError::Parse {
                    line: s.line,
                    reason: format!("duplicate subcircuit `{}` (previously defined as `{prev}`)", s.name),
                });
            }
            self.ports.insert(key, (s.name.clone(), s.ports.len()));
        }
        Ok(())
    }

    fn convert_subckt(&self, subckt: Subckt) -> ConvResult<SubcircuitDef> {
        let mut seen = HashSet::new();
        let mut instances = Vec::with_capacity(subckt.components.len());
        for c in subckt.components {
            if !seen.insert(c.name.clone()) {
                return Err(duplicate_instance(&c, &subckt.name));
            }
            instances.push(self.convert_component(c)?);
        }
        Ok(SubcircuitDef {
            name: subckt.name,
            ports: subckt.ports,
            instances,
            params: subckt.params,
            line: subckt.line,
        })
    }

    fn convert_component(&self, c: Component) -> ConvResult<Instance> {
        let master = match c.master {
            RawMaster::Primitive(p) => Master::Primitive(p),
            RawMaster::Subckt { name, strict } => match self.ports.get(&fold_name(&name)) {
                Some((canonical, nports)) => {
                    if *nports != c.connections.len() {
                        return Err(ParserError::Parse {
                            line: c.line,
                            reason: format!(
                                "instance `{}` connects {} nets, but subcircuit `{canonical}` has {nports} ports",
                                c.name,
                                c.connections.len()
                            ),
                        });
                    }
                    Master::Subckt {
                        name: canonical.clone(),
                    }
                }
                None if strict => {
                    return Err(ParserError::UndefinedReference {
                        instance: c.name,
                        master: name,
                    })
                }
                None => Master::Primitive(self.spectre_primitive(name)),
            },
        };
        Ok(Instance {
            name: c.name,
            master,
            connections: c.connections,
            params: c.params,
            line: c.line,
        })
    }

    /// Classifies a Spectre master that is not a subcircuit.
    ///
    /// Built-in primitives carry no model; model references take the device kind of
    /// their `model` statement, or [`DeviceKind::Device`] if it is unknown.
    fn spectre_primitive(&self, name: ArcStr) -> Primitive {
        if let Some(kind) = DeviceKind::from_spectre_primitive(&name) {
            return Primitive { kind, model: None };
        }
        let kind = self
            .ast
            .models
            .get(&fold_name(&name))
            .copied()
            .unwrap_or(DeviceKind::Device);
        Primitive {
            kind,
            model: Some(name),
        }
    }
}

fn duplicate_instance(c: &Component, scope: &str) -> ParserError {
    ParserError::Parse {
        line: c.line,
        reason: format!("duplicate instance `{}` in `{scope}`", c.name),
    }
}
