use std::{
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use itertools::Itertools;

use crate::{OpRecord, Variable};

// -----------------------------------------------------------------------------
// _GraphvizNode
// -----------------------------------------------------------------------------
#[derive(Debug, Clone)]
enum _GraphvizNode {
    Var { name: String, shape: Vec<usize> },
    Op { op_type: String, style: String },
}

impl _GraphvizNode {
    fn attributes(&self) -> String {
        match self {
            _GraphvizNode::Var { name, shape } if shape.is_empty() => {
                format!("label=\"{name}|?\", shape=record")
            }
            _GraphvizNode::Var { name, shape } => {
                format!("label=\"{name}|[{}]\", shape=record", shape.iter().join(", "))
            }
            _GraphvizNode::Op { op_type, style } => format!("label=\"{op_type}\", {style}"),
        }
    }
}

// -----------------------------------------------------------------------------
// GraphvizBuilder
// -----------------------------------------------------------------------------
/// Builder of a DOT graph whose nodes are operators and variables.
///
/// Each variable appears once no matter how many records refer to it,
/// so fan-out shows up as multiple outgoing edges.
#[derive(Debug, Clone)]
pub struct GraphvizBuilder {
    name: String,
    nodes: Vec<_GraphvizNode>,
    edges: Vec<(usize, usize, String)>,
    var2node: HashMap<*const Variable, usize>,
    graph_settings: BTreeMap<String, String>,
    node_settings: BTreeMap<String, String>,
}

impl GraphvizBuilder {
    #[inline]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            var2node: HashMap::new(),
            graph_settings: BTreeMap::new(),
            node_settings: BTreeMap::new(),
        }
    }

    /// Attribute applied to the whole graph, e.g. `rankdir`.
    #[inline]
    pub fn with_graph_setting(&mut self, key: &str, value: &str) -> &mut Self {
        self.graph_settings.insert(key.to_string(), value.to_string());
        self
    }

    /// Attribute applied to every node, e.g. `fontname`.
    #[inline]
    pub fn with_node_setting(&mut self, key: &str, value: &str) -> &mut Self {
        self.node_settings.insert(key.to_string(), value.to_string());
        self
    }

    /// Add operator nodes drawn with `style`, connected to their variables.
    pub fn add_ops(&mut self, ops: &[OpRecord], style: &str) -> &mut Self {
        for op in ops {
            self.nodes.push(_GraphvizNode::Op {
                op_type: op.op_type().to_string(),
                style: style.to_string(),
            });
            let op_idx = self.nodes.len() - 1;
            for (slot, vars) in op.inputs() {
                for var in vars {
                    let var_idx = self._var_node(var);
                    self.edges.push((var_idx, op_idx, slot.clone()));
                }
            }
            for (slot, vars) in op.outputs() {
                for var in vars {
                    let var_idx = self._var_node(var);
                    self.edges.push((op_idx, var_idx, slot.clone()));
                }
            }
        }
        self
    }

    /// Render the graph in DOT. Empty sections are left out.
    pub fn gen_dot(&self) -> String {
        let settings: String = [("graph", &self.graph_settings), ("node", &self.node_settings)]
            .into_iter()
            .filter(|(_, settings)| !settings.is_empty())
            .map(|(kind, settings)| format!("  {kind} [{}];\n", _attr_list(settings)))
            .collect();
        let nodes: String = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| format!("  {idx} [{}];\n", node.attributes()))
            .collect();
        let edges: String = self
            .edges
            .iter()
            .map(|(src, dst, slot)| format!("  {src} -> {dst} [label=\"{slot}\"];\n"))
            .collect();

        let sections = [settings, nodes, edges]
            .into_iter()
            .filter(|section| !section.is_empty())
            .join("\n");
        format!("digraph {} {{\n{}}}\n", self.name, sections)
    }
}

// impls
impl GraphvizBuilder {
    fn _var_node(&mut self, var: &Rc<Variable>) -> usize {
        if let Some(idx) = self.var2node.get(&Rc::as_ptr(var)) {
            return *idx;
        }
        self.nodes.push(_GraphvizNode::Var {
            name: var.name().to_string(),
            shape: var.get().shape().to_vec(),
        });
        let idx = self.nodes.len() - 1;
        self.var2node.insert(Rc::as_ptr(var), idx);
        idx
    }
}

#[inline]
fn _attr_list(settings: &BTreeMap<String, String>) -> String {
    settings.iter().map(|(k, v)| format!("{k}={v}")).join(", ")
}
