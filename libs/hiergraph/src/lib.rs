//! Instance hierarchy graphs.
//!
//! A [`HierarchyGraph`] expands a [`NetlistDocument`] into a tree with one
//! [`HierarchyNode`] per instantiation site. Definitions are never copied: a node
//! names its master and the definition is looked up in the shared document.
//!
//! Every node carries a [`Signature`] used for structural matching.
#![warn(missing_docs)]

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use arcstr::ArcStr;
use netlist::{fold_name, Instance, Master, NetlistDocument, Params, SubcircuitDef};
use serde::Serialize;
use thiserror::Error;

pub mod signature;

pub use signature::{MasterKey, PortClass, Signature, SignatureKey};

use signature::LocalSignatures;

#[cfg(test)]
mod tests;

/// The default separator between instance names in a path.
pub const DEFAULT_SEPARATOR: char = '/';

/// The identifier of a node in a [`HierarchyGraph`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct NodeId(usize);

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Which instances form the roots of the hierarchy.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub enum Roots {
    /// The top-level instances, if there are any.
    ///
    /// Otherwise, the instances of the single uninstantiated subcircuit. With several
    /// uninstantiated subcircuits, each becomes a root node named after itself.
    #[default]
    Auto,
    /// The top-level instances only.
    TopLevel,
    /// The instances of the named subcircuit.
    Subckt(ArcStr),
}

/// Options controlling graph construction.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// The separator between instance names in a path.
    pub separator: char,
    /// Which instances form the roots of the hierarchy.
    pub roots: Roots,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
            roots: Roots::Auto,
        }
    }
}

/// An error building a [`HierarchyGraph`].
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum BuildError {
    /// A subcircuit transitively instantiates itself.
    #[error("cyclic hierarchy: {}", .chain.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" -> "))]
    CyclicHierarchy {
        /// The subcircuits on the cycle, starting and ending with the same subcircuit.
        chain: Vec<ArcStr>,
    },
    /// The requested root subcircuit does not exist.
    #[error("no subcircuit named `{0}` to use as the hierarchy root")]
    UnknownRoot(ArcStr),
    /// An instance names a subcircuit missing from the document.
    #[error("instance `{instance}` references undefined subcircuit `{master}`")]
    UndefinedMaster {
        /// The instance name.
        instance: ArcStr,
        /// The missing subcircuit.
        master: ArcStr,
    },
    /// Two nodes would share a path.
    #[error("duplicate hierarchy path `{0}`")]
    DuplicatePath(ArcStr),
}

/// A node of a [`HierarchyGraph`]: one instantiation site.
#[derive(Debug, Clone)]
pub struct HierarchyNode {
    id: NodeId,
    path: ArcStr,
    depth: usize,
    instance: Instance,
    scope: Option<ArcStr>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    signature: Signature,
}

impl HierarchyNode {
    /// The node's identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The full path of the node.
    pub fn path(&self) -> &ArcStr {
        &self.path
    }

    /// The local instance name: the last segment of the path.
    pub fn name(&self) -> &ArcStr {
        &self.instance.name
    }

    /// The number of ancestors of the node.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The instance this node corresponds to.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The name of the definition containing the instance.
    ///
    /// [`None`] for top-level instances and synthetic roots.
    pub fn scope(&self) -> Option<&ArcStr> {
        self.scope.as_ref()
    }

    /// The parent node, if any.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The child nodes, in instance order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The node's structural signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// A tree of instantiation sites keyed by path.
#[derive(Debug, Clone)]
pub struct HierarchyGraph {
    doc: Arc<NetlistDocument>,
    separator: char,
    nodes: Vec<HierarchyNode>,
    roots: Vec<NodeId>,
    root_scope: Option<ArcStr>,
    by_path: HashMap<ArcStr, NodeId>,
    by_folded_path: HashMap<String, Vec<NodeId>>,
    by_key: HashMap<SignatureKey, Vec<NodeId>>,
}

/// Builds a hierarchy graph with the default path separator.
pub fn build(doc: Arc<NetlistDocument>, roots: Roots) -> Result<HierarchyGraph, BuildError> {
    HierarchyGraph::build(
        doc,
        BuildOptions {
            roots,
            ..Default::default()
        },
    )
}

impl HierarchyGraph {
    /// Expands `doc` into a hierarchy graph.
    pub fn build(doc: Arc<NetlistDocument>, opts: BuildOptions) -> Result<Self, BuildError> {
        let mut builder = GraphBuilder::new(&doc, opts.separator);
        builder.seed(&opts.roots)?;
        let GraphBuilder {
            nodes,
            roots,
            root_scope,
            by_path,
            ..
        } = builder;

        let mut by_folded_path: HashMap<String, Vec<NodeId>> = HashMap::new();
        let mut by_key: HashMap<SignatureKey, Vec<NodeId>> = HashMap::new();
        for node in nodes.iter() {
            by_folded_path
                .entry(node.path.to_lowercase())
                .or_default()
                .push(node.id);
            by_key
                .entry(node.signature.key.clone())
                .or_default()
                .push(node.id);
        }
        tracing::debug!(
            netlist = %doc.name(),
            nodes = nodes.len(),
            roots = roots.len(),
            "built hierarchy graph"
        );

        Ok(Self {
            doc,
            separator: opts.separator,
            nodes,
            roots,
            root_scope,
            by_path,
            by_folded_path,
            by_key,
        })
    }

    /// The document the graph was built from.
    pub fn doc(&self) -> &Arc<NetlistDocument> {
        &self.doc
    }

    /// The path separator.
    pub fn separator(&self) -> char {
        self.separator
    }

    /// The number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root nodes.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// The definition whose instances are the roots, if the roots come from a subcircuit.
    pub fn root_scope(&self) -> Option<&SubcircuitDef> {
        self.root_scope.as_ref().and_then(|s| self.doc.subckt(s))
    }

    /// Gets a node by ID.
    ///
    /// # Panics
    ///
    /// Panics if the ID does not belong to this graph.
    pub fn node(&self, id: NodeId) -> &HierarchyNode {
        &self.nodes[id.0]
    }

    /// Iterates over all nodes in depth-first preorder.
    pub fn nodes(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.nodes.iter()
    }

    /// Splits a path into its instance names.
    ///
    /// Leading and trailing separators are ignored.
    pub fn split_path<'a>(&self, path: &'a str) -> Vec<&'a str> {
        path.trim()
            .split(self.separator)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Joins instance names into a path.
    pub fn join_path<S: AsRef<str>>(&self, segments: &[S]) -> String {
        let mut out = String::new();
        for (i, s) in segments.iter().enumerate() {
            if i > 0 {
                out.push(self.separator);
            }
            out.push_str(s.as_ref());
        }
        out
    }

    /// Looks up a node by path.
    ///
    /// An exact match is preferred; otherwise the path is matched case-insensitively
    /// if exactly one node matches.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let segments = self.split_path(path);
        if segments.is_empty() {
            return None;
        }
        let path = self.join_path(&segments);
        if let Some(&id) = self.by_path.get(path.as_str()) {
            return Some(id);
        }
        match self.by_folded_path.get(&path.to_lowercase()).map(Vec::as_slice) {
            Some(&[id]) => Some(id),
            _ => None,
        }
    }

    /// Splits a path ending in a net name into the node that owns the net and the net.
    ///
    /// The net must be a net of the node's master definition.
    pub fn find_net(&self, path: &str) -> Option<(NodeId, ArcStr)> {
        let segments = self.split_path(path);
        let (net, prefix) = segments.split_last()?;
        if prefix.is_empty() {
            return None;
        }
        let id = self.find(&self.join_path(prefix))?;
        let def = self.definition(id)?;
        def.nets()
            .into_iter()
            .find(|n| n.as_str() == *net)
            .or_else(|| def.nets().into_iter().find(|n| n.eq_ignore_ascii_case(net)))
            .map(|n| (id, n))
    }

    /// The nodes with the given signature key, in depth-first preorder.
    pub fn with_signature(&self, key: &SignatureKey) -> &[NodeId] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The subcircuit definition a node instantiates, if it is a subcircuit instance.
    pub fn definition(&self, id: NodeId) -> Option<&SubcircuitDef> {
        self.node(id)
            .instance
            .master
            .subckt_name()
            .and_then(|name| self.doc.subckt(name))
    }

    /// The definition containing a node's instance.
    pub fn scope_definition(&self, id: NodeId) -> Option<&SubcircuitDef> {
        self.node(id).scope.as_ref().and_then(|s| self.doc.subckt(s))
    }

    /// Iterates over the ancestors of a node, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.node(id).parent, move |&p| self.node(p).parent)
    }

    /// The instance names along a node's path, from the root.
    pub fn segments(&self, id: NodeId) -> Vec<&ArcStr> {
        let mut segments: Vec<&ArcStr> = self
            .ancestors(id)
            .map(|a| self.node(a).name())
            .collect();
        segments.reverse();
        segments.push(self.node(id).name());
        segments
    }

    /// The other nodes sharing a node's parent.
    pub fn siblings(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let peers = match self.node(id).parent {
            Some(p) => self.node(p).children.as_slice(),
            None => self.roots.as_slice(),
        };
        peers.iter().copied().filter(move |&s| s != id)
    }

    /// Returns `true` if `ancestor` is a proper ancestor of `id`.
    pub fn is_descendant(&self, id: NodeId, ancestor: NodeId) -> bool {
        self.ancestors(id).any(|a| a == ancestor)
    }

    /// All descendants of a node, in depth-first preorder.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.node(n).children.iter().rev().copied());
        }
        out
    }
}

struct GraphBuilder<'a> {
    doc: &'a NetlistDocument,
    separator: char,
    nodes: Vec<HierarchyNode>,
    roots: Vec<NodeId>,
    root_scope: Option<ArcStr>,
    by_path: HashMap<ArcStr, NodeId>,
    locals: HashMap<ArcStr, Arc<LocalSignatures>>,
    /// Folded names of the definitions being expanded.
    stack: Vec<ArcStr>,
}

impl<'a> GraphBuilder<'a> {
    fn new(doc: &'a NetlistDocument, separator: char) -> Self {
        Self {
            doc,
            separator,
            nodes: Vec::new(),
            roots: Vec::new(),
            root_scope: None,
            by_path: HashMap::new(),
            locals: HashMap::new(),
            stack: Vec::new(),
        }
    }

    fn seed(&mut self, roots: &Roots) -> Result<(), BuildError> {
        let doc = self.doc;
        match roots {
            Roots::TopLevel => self.seed_top(),
            Roots::Subckt(name) => {
                let def = doc
                    .subckt(name)
                    .ok_or_else(|| BuildError::UnknownRoot(name.clone()))?;
                self.seed_scope(def)
            }
            Roots::Auto if !doc.top_instances().is_empty() => self.seed_top(),
            Roots::Auto => match doc.uninstantiated_subckts().as_slice() {
                [def] => self.seed_scope(def),
                cells => {
                    for def in cells {
                        self.seed_cell(def)?;
                    }
                    Ok(())
                }
            },
        }
    }

    fn seed_top(&mut self) -> Result<(), BuildError> {
        let doc = self.doc;
        let instances = doc.top_instances();
        let local = LocalSignatures::compute(doc, None, instances);
        for (i, inst) in instances.iter().enumerate() {
            let id = self.add_node(None, None, Vec::new(), inst.clone(), &local, i)?;
            self.roots.push(id);
            self.expand(id)?;
        }
        Ok(())
    }

    fn seed_scope(&mut self, def: &SubcircuitDef) -> Result<(), BuildError> {
        tracing::debug!(root = %def.name, "using subcircuit as hierarchy root");
        self.root_scope = Some(def.name.clone());
        self.stack.push(fold_name(&def.name));
        let local = self.local(def);
        for (i, inst) in def.instances.iter().enumerate() {
            let id = self.add_node(
                None,
                Some(def.name.clone()),
                Vec::new(),
                inst.clone(),
                &local,
                i,
            )?;
            self.roots.push(id);
            self.expand(id)?;
        }
        self.stack.pop();
        Ok(())
    }

    /// Adds a root node standing for a whole subcircuit.
    fn seed_cell(&mut self, def: &SubcircuitDef) -> Result<(), BuildError> {
        let inst = Instance {
            name: def.name.clone(),
            master: Master::Subckt {
                name: def.name.clone(),
            },
            connections: def.ports.clone(),
            params: Params::new(),
            line: def.line,
        };
        let local = LocalSignatures::compute(self.doc, None, std::slice::from_ref(&inst));
        let id = self.add_node(None, None, Vec::new(), inst, &local, 0)?;
        self.roots.push(id);
        self.expand(id)
    }

    fn local(&mut self, def: &SubcircuitDef) -> Arc<LocalSignatures> {
        let doc = self.doc;
        self.locals
            .entry(fold_name(&def.name))
            .or_insert_with(|| Arc::new(LocalSignatures::compute(doc, Some(def), &def.instances)))
            .clone()
    }

    fn add_node(
        &mut self,
        parent: Option<NodeId>,
        scope: Option<ArcStr>,
        ancestors: Vec<MasterKey>,
        instance: Instance,
        local: &LocalSignatures,
        idx: usize,
    ) -> Result<NodeId, BuildError> {
        let id = NodeId(self.nodes.len());
        let (path, depth) = match parent {
            Some(p) => {
                let p = &self.nodes[p.0];
                (
                    arcstr::format!("{}{}{}", p.path, self.separator, instance.name),
                    p.depth + 1,
                )
            }
            None => (instance.name.clone(), 0),
        };
        if self.by_path.insert(path.clone(), id).is_some() {
            return Err(BuildError::DuplicatePath(path));
        }
        let signature = Signature {
            key: SignatureKey {
                ancestors,
                master: local.masters[idx].clone(),
                ports: local.ports[idx].clone(),
            },
            sibling_ordinal: local.ordinals[idx],
        };
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        self.nodes.push(HierarchyNode {
            id,
            path,
            depth,
            instance,
            scope,
            parent,
            children: Vec::new(),
            signature,
        });
        Ok(id)
    }

    fn expand(&mut self, id: NodeId) -> Result<(), BuildError> {
        let doc = self.doc;
        let node = &self.nodes[id.0];
        let Master::Subckt { name } = &node.instance.master else {
            return Ok(());
        };
        let def = doc.subckt(name).ok_or_else(|| BuildError::UndefinedMaster {
            instance: node.instance.name.clone(),
            master: name.clone(),
        })?;
        let key = fold_name(&def.name);
        if let Some(pos) = self.stack.iter().position(|s| *s == key) {
            let mut chain: Vec<ArcStr> = self.stack[pos..].to_vec();
            chain.push(key);
            return Err(BuildError::CyclicHierarchy { chain });
        }

        let mut ancestors = node.signature.key.ancestors.clone();
        ancestors.push(node.signature.key.master.clone());
        let local = self.local(def);
        self.stack.push(key);
        for (i, inst) in def.instances.iter().enumerate() {
            let child = self.add_node(
                Some(id),
                Some(def.name.clone()),
                ancestors.clone(),
                inst.clone(),
                &local,
                i,
            )?;
            self.expand(child)?;
        }
        self.stack.pop();
        Ok(())
    }
}
