//! Material node graph with referential integrity.
//!
//! Nodes, pins and links live in flat maps keyed by IDs drawn from a single
//! counter. IDs are never reused and `0` is never handed out.

use crate::error::GraphError;
use crate::node::{Domain, NodeKind};
use crate::value::{PinType, PinValue};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

macro_rules! graph_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            /// Sentinel that never names a live object.
            pub const INVALID: Self = Self(0);

            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }
    };
}

graph_id!(
    /// Node identifier.
    NodeId
);
graph_id!(
    /// Pin identifier.
    PinId
);
graph_id!(
    /// Link identifier.
    LinkId
);

/// Whether a pin consumes or produces a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    Input,
    Output,
}

/// A typed slot on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub id: PinId,
    pub node: NodeId,
    pub direction: PinDirection,
    /// Position in the owning node's input or output list.
    pub index: usize,
    pub name: String,
    pub ty: PinType,
    /// Value used when an input is unconnected.
    pub default: Option<PinValue>,
}

/// A node instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Editor position. Not part of the content hash.
    pub position: [f32; 2],
    pub inputs: Vec<PinId>,
    pub outputs: Vec<PinId>,
    pub params: Vec<PinValue>,
}

/// Connection from an output pin to an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    /// Output pin.
    pub start: PinId,
    /// Input pin.
    pub end: PinId,
}

/// Directed graph of shading nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialGraph {
    domain: Domain,
    nodes: HashMap<NodeId, Node>,
    pins: HashMap<PinId, Pin>,
    links: HashMap<LinkId, Link>,
    next_id: u32,
}

/// Hash given to a node that is its own ancestor.
const CYCLE_HASH: u64 = 0x9e37_79b9_7f4a_7c15;

impl MaterialGraph {
    /// Empty graph holding only the output node of `domain`.
    pub fn new(domain: Domain) -> Self {
        let mut graph = Self {
            domain,
            nodes: HashMap::new(),
            pins: HashMap::new(),
            links: HashMap::new(),
            next_id: 1,
        };
        graph.insert_node(NodeKind::output_for(domain), [0.0, 0.0]);
        graph
    }

    /// Domain the graph compiles for.
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_node(&mut self, kind: NodeKind, position: [f32; 2]) -> NodeId {
        let schema = kind.schema();
        let id = NodeId(self.allocate_id());

        let mut inputs = Vec::with_capacity(schema.inputs.len());
        for (index, spec) in schema.inputs.into_iter().enumerate() {
            let pin = PinId(self.allocate_id());
            self.pins.insert(
                pin,
                Pin {
                    id: pin,
                    node: id,
                    direction: PinDirection::Input,
                    index,
                    name: spec.name.to_string(),
                    ty: spec.ty,
                    default: spec.default,
                },
            );
            inputs.push(pin);
        }

        let mut outputs = Vec::with_capacity(schema.outputs.len());
        for (index, spec) in schema.outputs.into_iter().enumerate() {
            let pin = PinId(self.allocate_id());
            self.pins.insert(
                pin,
                Pin {
                    id: pin,
                    node: id,
                    direction: PinDirection::Output,
                    index,
                    name: spec.name.to_string(),
                    ty: spec.ty,
                    default: None,
                },
            );
            outputs.push(pin);
        }

        let params = schema.params.into_iter().map(|p| p.default).collect();
        self.nodes.insert(
            id,
            Node {
                id,
                kind,
                position,
                inputs,
                outputs,
                params,
            },
        );
        id
    }

    /// Add a node with the pins of its kind's schema.
    ///
    /// A second output node for a domain is refused.
    pub fn create_node(&mut self, kind: NodeKind, position: [f32; 2]) -> Result<NodeId, GraphError> {
        if let Some(domain) = kind.output_domain() {
            if self.output_node(domain).is_some() {
                return Err(GraphError::DuplicateOutput(domain));
            }
        }
        Ok(self.insert_node(kind, position))
    }

    /// Connect an output pin to an input pin.
    ///
    /// Any link already feeding `end` is removed first.
    pub fn create_link(&mut self, start: PinId, end: PinId) -> Result<LinkId, GraphError> {
        let start_pin = self.pins.get(&start).ok_or(GraphError::UnknownPin(start))?;
        let end_pin = self.pins.get(&end).ok_or(GraphError::UnknownPin(end))?;

        if start_pin.direction != PinDirection::Output || end_pin.direction != PinDirection::Input {
            return Err(GraphError::Direction);
        }
        if start_pin.node == end_pin.node {
            return Err(GraphError::SameNode(start, end));
        }
        if start_pin.ty == PinType::Sampler {
            return Err(GraphError::Sampler(start));
        }
        if end_pin.ty == PinType::Sampler {
            return Err(GraphError::Sampler(end));
        }
        if self.upstream_nodes(start_pin.node).contains(&end_pin.node) {
            return Err(GraphError::Cycle { start, end });
        }

        if let Some(existing) = self.link_into(end).map(|l| l.id) {
            self.links.remove(&existing);
        }
        Ok(self.insert_link(start, end))
    }

    fn insert_link(&mut self, start: PinId, end: PinId) -> LinkId {
        let id = LinkId(self.allocate_id());
        self.links.insert(id, Link { id, start, end });
        id
    }

    /// Insert a link without validation, for exercising malformed graphs.
    #[cfg(test)]
    pub(crate) fn force_link(&mut self, start: PinId, end: PinId) -> LinkId {
        self.insert_link(start, end)
    }

    pub fn delete_link(&mut self, id: LinkId) -> Result<Link, GraphError> {
        self.links.remove(&id).ok_or(GraphError::UnknownLink(id))
    }

    /// Remove a node, its pins and every link touching them.
    ///
    /// Output nodes cannot be deleted.
    pub fn delete_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))?;
        if node.kind.is_output() {
            return Err(GraphError::OutputNode(id));
        }

        let owned: HashSet<PinId> = node.inputs.iter().chain(&node.outputs).copied().collect();
        self.links
            .retain(|_, link| !owned.contains(&link.start) && !owned.contains(&link.end));
        self.pins.retain(|pin, _| !owned.contains(pin));
        self.nodes.remove(&id).ok_or(GraphError::UnknownNode(id))
    }

    /// Replace a node parameter, returning the previous value.
    pub fn set_param(
        &mut self,
        node: NodeId,
        index: usize,
        value: PinValue,
    ) -> Result<PinValue, GraphError> {
        let node = self.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        let kind = node.kind;
        let slot = node
            .params
            .get_mut(index)
            .ok_or(GraphError::UnknownParam { kind, index })?;
        if !slot.same_kind(&value) {
            return Err(GraphError::ValueType {
                expected: slot.pin_type(),
                actual: value.pin_type(),
            });
        }
        Ok(std::mem::replace(slot, value))
    }

    /// Replace the default of an input pin, returning the previous value.
    pub fn set_pin_default(&mut self, pin: PinId, value: PinValue) -> Result<PinValue, GraphError> {
        let pin_ref = self.pins.get_mut(&pin).ok_or(GraphError::UnknownPin(pin))?;
        let ty = pin_ref.ty;
        let slot = pin_ref.default.as_mut().ok_or(GraphError::ValueType {
            expected: ty,
            actual: value.pin_type(),
        })?;
        if !slot.same_kind(&value) {
            return Err(GraphError::ValueType {
                expected: ty,
                actual: value.pin_type(),
            });
        }
        Ok(std::mem::replace(slot, value))
    }

    /// Move a node in the editor, returning its previous position.
    pub fn move_node(&mut self, node: NodeId, position: [f32; 2]) -> Result<[f32; 2], GraphError> {
        let node = self.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        Ok(std::mem::replace(&mut node.position, position))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn pin(&self, id: PinId) -> Option<&Pin> {
        self.pins.get(&id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// The output node of `domain`, if the graph has one.
    pub fn output_node(&self, domain: Domain) -> Option<NodeId> {
        let kind = NodeKind::output_for(domain);
        self.nodes.values().find(|n| n.kind == kind).map(|n| n.id)
    }

    /// Output node of the graph's own domain.
    pub fn active_output(&self) -> Option<NodeId> {
        self.output_node(self.domain)
    }

    /// The link feeding an input pin.
    pub fn link_into(&self, pin: PinId) -> Option<&Link> {
        self.links.values().find(|l| l.end == pin)
    }

    /// Links leaving an output pin.
    pub fn links_from(&self, pin: PinId) -> impl Iterator<Item = &Link> {
        self.links.values().filter(move |l| l.start == pin)
    }

    /// Input pin of `node` with the given name.
    pub fn input(&self, node: NodeId, name: &str) -> Option<PinId> {
        self.find_pin(self.nodes.get(&node)?.inputs.iter(), name)
    }

    /// Output pin of `node` with the given name.
    pub fn output(&self, node: NodeId, name: &str) -> Option<PinId> {
        self.find_pin(self.nodes.get(&node)?.outputs.iter(), name)
    }

    fn find_pin<'a>(&self, mut pins: impl Iterator<Item = &'a PinId>, name: &str) -> Option<PinId> {
        pins.find(|id| self.pins.get(*id).is_some_and(|p| p.name == name))
            .copied()
    }

    /// Node and output pin feeding an input, if it is connected.
    pub fn source_of(&self, input: PinId) -> Option<(&Node, &Pin)> {
        let link = self.link_into(input)?;
        let pin = self.pins.get(&link.start)?;
        let node = self.nodes.get(&pin.node)?;
        Some((node, pin))
    }

    /// Every node `node` transitively reads from, including itself.
    fn upstream_nodes(&self, node: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(
                    node.inputs
                        .iter()
                        .filter_map(|&input| self.source_of(input))
                        .map(|(source, _)| source.id),
                );
            }
        }
        seen
    }

    /// Lowest node ID that is its own ancestor, if any.
    ///
    /// Links made through [`create_link`](Self::create_link) never close a
    /// cycle; deserialized graphs are not checked until this is called.
    pub fn find_cycle(&self) -> Option<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().find(|id| {
            self.nodes[id]
                .inputs
                .iter()
                .filter_map(|&input| self.source_of(input))
                .any(|(source, _)| self.upstream_nodes(source.id).contains(id))
        })
    }

    /// Content hash of the graph.
    ///
    /// Each node hashes its kind, parameters, pin defaults and the hashes of
    /// the nodes feeding it. The node hashes are sorted before combining, so
    /// the result depends neither on insertion order nor on IDs. Positions
    /// are ignored.
    ///
    /// Only hashes of nodes with no cycle upstream are reused, so a cyclic
    /// graph also hashes the same whatever order its nodes are visited in.
    pub fn compute_hash(&self) -> u64 {
        let mut memo = HashMap::new();
        let mut stack = Vec::new();
        let mut hashes: Vec<u64> = self
            .nodes
            .keys()
            .map(|&id| self.node_hash(id, &mut memo, &mut stack).0)
            .collect();
        hashes.sort_unstable();

        let mut hasher = DefaultHasher::new();
        self.domain.hash(&mut hasher);
        hashes.hash(&mut hasher);
        hasher.finish()
    }

    /// Hash of `id` and whether a cycle was met below it.
    fn node_hash(
        &self,
        id: NodeId,
        memo: &mut HashMap<NodeId, u64>,
        stack: &mut Vec<NodeId>,
    ) -> (u64, bool) {
        if let Some(&hash) = memo.get(&id) {
            return (hash, false);
        }
        if stack.contains(&id) {
            return (CYCLE_HASH, true);
        }
        let Some(node) = self.nodes.get(&id) else {
            return (0, false);
        };

        stack.push(id);
        let mut cyclic = false;
        let mut hasher = DefaultHasher::new();
        node.kind.hash(&mut hasher);
        node.params.len().hash(&mut hasher);
        for param in &node.params {
            param.hash_into(&mut hasher);
        }
        for &input in &node.inputs {
            let Some(pin) = self.pins.get(&input) else {
                continue;
            };
            match &pin.default {
                Some(value) => value.hash_into(&mut hasher),
                None => 0xffu8.hash(&mut hasher),
            }
            match self.source_of(input) {
                Some((source, source_pin)) => {
                    1u8.hash(&mut hasher);
                    source_pin.index.hash(&mut hasher);
                    let (hash, upstream_cycle) = self.node_hash(source.id, memo, stack);
                    hash.hash(&mut hasher);
                    cyclic |= upstream_cycle;
                }
                None => 0u8.hash(&mut hasher),
            }
        }
        stack.pop();

        let hash = hasher.finish();
        if !cyclic {
            memo.insert(id, hash);
        }
        (hash, cyclic)
    }
}

impl Default for MaterialGraph {
    fn default() -> Self {
        Self::new(Domain::Surface)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn pin(graph: &MaterialGraph, node: NodeId, name: &str, output: bool) -> PinId {
        let found = if output {
            graph.output(node, name)
        } else {
            graph.input(node, name)
        };
        found.unwrap_or_else(|| panic!("no pin {name}"))
    }

    /// Rgb -> Add.A, Value -> Add.B, Add -> BSDF.Base Color, BSDF -> output.
    fn sample_graph(reverse: bool) -> MaterialGraph {
        let mut graph = MaterialGraph::new(Domain::Surface);
        let output = graph.active_output().unwrap();
        let kinds = [NodeKind::PrincipledBsdf, NodeKind::Add, NodeKind::Rgb, NodeKind::Value];
        let mut ids = Vec::new();
        if reverse {
            for kind in kinds.iter().rev() {
                ids.push(graph.create_node(*kind, [10.0, 20.0]).unwrap());
            }
            ids.reverse();
        } else {
            for kind in kinds {
                ids.push(graph.create_node(kind, [0.0, 0.0]).unwrap());
            }
        }
        let [bsdf, add, rgb, value] = [ids[0], ids[1], ids[2], ids[3]];
        graph.set_param(value, 0, PinValue::Float(0.25)).unwrap();

        let mut links = vec![
            (pin(&graph, bsdf, "BSDF", true), pin(&graph, output, "Surface", false)),
            (pin(&graph, add, "Vector", true), pin(&graph, bsdf, "Base Color", false)),
            (pin(&graph, rgb, "Color", true), pin(&graph, add, "A", false)),
            (pin(&graph, value, "Value", true), pin(&graph, add, "B", false)),
        ];
        if reverse {
            links.reverse();
        }
        for (start, end) in links {
            graph.create_link(start, end).unwrap();
        }
        graph
    }

    #[test]
    fn new_graph_has_its_output() {
        let graph = MaterialGraph::new(Domain::Volume);
        let output = graph.active_output().unwrap();
        assert_eq!(graph.node(output).unwrap().kind, NodeKind::VolumeOutput);
        assert!(graph.output_node(Domain::Surface).is_none());
        assert_eq!(output, NodeId(1));
    }

    #[test]
    fn ids_are_unique_and_never_zero() {
        let mut graph = MaterialGraph::default();
        let a = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        graph.delete_node(a).unwrap();
        let b = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        assert!(b.0 > a.0);
        assert!(graph.nodes().all(|n| n.id.is_valid()));
        assert!(!NodeId::INVALID.is_valid());
    }

    #[test]
    fn second_output_refused() {
        let mut graph = MaterialGraph::new(Domain::Surface);
        assert_eq!(
            graph.create_node(NodeKind::SurfaceOutput, [0.0, 0.0]),
            Err(GraphError::DuplicateOutput(Domain::Surface))
        );
        // The other domain may still get one
        assert!(graph.create_node(NodeKind::VolumeOutput, [0.0, 0.0]).is_ok());
    }

    #[test]
    fn output_node_cannot_be_deleted() {
        let mut graph = sample_graph(false);
        let before = graph.clone();
        let output = graph.active_output().unwrap();
        assert_eq!(graph.delete_node(output), Err(GraphError::OutputNode(output)));
        assert_eq!(graph, before);
    }

    #[test]
    fn delete_cascades_exactly_owned_pins_and_links() {
        let mut graph = sample_graph(false);
        let add = graph.nodes().find(|n| n.kind == NodeKind::Add).unwrap().clone();
        let owned: Vec<PinId> = add.inputs.iter().chain(&add.outputs).copied().collect();

        let pins_before = graph.pin_count();
        let links_before = graph.link_count();
        graph.delete_node(add.id).unwrap();

        assert_eq!(graph.pin_count(), pins_before - owned.len());
        // Rgb->A, Value->B, Add->Base Color
        assert_eq!(graph.link_count(), links_before - 3);
        assert!(owned.iter().all(|p| graph.pin(*p).is_none()));
        assert!(graph
            .links()
            .all(|l| !owned.contains(&l.start) && !owned.contains(&l.end)));
        // BSDF -> output survives
        assert_eq!(graph.link_count(), 1);
        assert!(graph.node(add.id).is_none());
    }

    #[test]
    fn second_link_replaces_first() {
        let mut graph = MaterialGraph::default();
        let a = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let b = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let clamp = graph.create_node(NodeKind::Clamp, [0.0, 0.0]).unwrap();
        let input = pin(&graph, clamp, "Value", false);

        let first = graph.create_link(pin(&graph, a, "Value", true), input).unwrap();
        let second = graph.create_link(pin(&graph, b, "Value", true), input).unwrap();

        assert!(graph.link(first).is_none());
        assert_eq!(graph.link_into(input).map(|l| l.id), Some(second));
        assert_eq!(graph.links().filter(|l| l.end == input).count(), 1);
    }

    #[test]
    fn invalid_links_refused() {
        let mut graph = MaterialGraph::default();
        let value = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        let clamp = graph.create_node(NodeKind::Clamp, [0.0, 0.0]).unwrap();
        let image = graph.create_node(NodeKind::ImageTexture, [0.0, 0.0]).unwrap();
        let out = pin(&graph, value, "Value", true);
        let clamp_in = pin(&graph, clamp, "Value", false);
        let clamp_out = pin(&graph, clamp, "Result", true);

        assert_eq!(graph.create_link(clamp_in, out), Err(GraphError::Direction));
        assert_eq!(graph.create_link(out, out), Err(GraphError::Direction));
        assert_eq!(
            graph.create_link(clamp_out, pin(&graph, clamp, "Min", false)),
            Err(GraphError::SameNode(clamp_out, pin(&graph, clamp, "Min", false)))
        );
        let sampler = pin(&graph, image, "Image", false);
        assert_eq!(graph.create_link(out, sampler), Err(GraphError::Sampler(sampler)));
        assert_eq!(
            graph.create_link(PinId(999), clamp_in),
            Err(GraphError::UnknownPin(PinId(999)))
        );
        assert_eq!(graph.link_count(), 0);
    }

    #[test]
    fn cycles_refused() {
        let mut graph = MaterialGraph::default();
        let a = graph.create_node(NodeKind::Clamp, [0.0, 0.0]).unwrap();
        let b = graph.create_node(NodeKind::Clamp, [0.0, 0.0]).unwrap();
        graph
            .create_link(pin(&graph, a, "Result", true), pin(&graph, b, "Value", false))
            .unwrap();
        let result = graph.create_link(pin(&graph, b, "Result", true), pin(&graph, a, "Value", false));
        assert!(matches!(result, Err(GraphError::Cycle { .. })));
        assert_eq!(graph.link_count(), 1);
    }

    /// Three clamps feeding each other in a ring, created in `order`.
    pub(crate) fn clamp_ring(order: [usize; 3]) -> MaterialGraph {
        let mut graph = MaterialGraph::default();
        let mut ids = [NodeId::INVALID; 3];
        for role in order {
            ids[role] = graph.create_node(NodeKind::Clamp, [0.0, 0.0]).unwrap();
        }
        for (role, &id) in ids.iter().enumerate() {
            let max = pin(&graph, id, "Max", false);
            graph
                .set_pin_default(max, PinValue::Float(0.5 + role as f32))
                .unwrap();
        }
        for role in 0..2 {
            graph
                .create_link(
                    pin(&graph, ids[role], "Result", true),
                    pin(&graph, ids[role + 1], "Value", false),
                )
                .unwrap();
        }
        // create_link refuses the closing edge
        graph.force_link(
            pin(&graph, ids[2], "Result", true),
            pin(&graph, ids[0], "Value", false),
        );
        graph
    }

    #[test]
    fn find_cycle_reports_ring_member() {
        assert_eq!(sample_graph(false).find_cycle(), None);
        assert_eq!(MaterialGraph::default().find_cycle(), None);

        let ring = clamp_ring([0, 1, 2]);
        let found = ring.find_cycle().unwrap();
        assert_eq!(ring.node(found).unwrap().kind, NodeKind::Clamp);
    }

    #[test]
    fn cyclic_hash_independent_of_visit_order() {
        let expected = clamp_ring([0, 1, 2]).compute_hash();
        for order in [[2, 1, 0], [1, 2, 0], [0, 2, 1], [2, 0, 1]] {
            let ring = clamp_ring(order);
            assert_eq!(ring.compute_hash(), expected, "order {order:?}");
            assert_eq!(ring.clone().compute_hash(), expected);
        }
        assert_ne!(expected, sample_graph(false).compute_hash());
    }

    #[test]
    fn hash_independent_of_insertion_order() {
        let forward = sample_graph(false);
        let reverse = sample_graph(true);
        let bsdf_id = |g: &MaterialGraph| {
            g.nodes()
                .find(|n| n.kind == NodeKind::PrincipledBsdf)
                .map(|n| n.id)
        };
        // Same content under different IDs
        assert_ne!(bsdf_id(&forward), bsdf_id(&reverse));
        assert_eq!(forward.compute_hash(), reverse.compute_hash());
    }

    #[test]
    fn hash_ignores_positions_but_tracks_content() {
        let mut graph = sample_graph(false);
        let base = graph.compute_hash();
        let value = graph.nodes().find(|n| n.kind == NodeKind::Value).unwrap().id;

        graph.move_node(value, [500.0, -20.0]).unwrap();
        assert_eq!(graph.compute_hash(), base);

        graph.set_param(value, 0, PinValue::Float(0.75)).unwrap();
        let changed = graph.compute_hash();
        assert_ne!(changed, base);

        graph.set_param(value, 0, PinValue::Float(0.25)).unwrap();
        assert_eq!(graph.compute_hash(), base);

        let link = graph
            .links()
            .find(|l| graph.pin(l.start).is_some_and(|p| p.node == value))
            .unwrap()
            .id;
        graph.delete_link(link).unwrap();
        assert_ne!(graph.compute_hash(), base);
    }

    #[test]
    fn hash_distinguishes_source_pin() {
        let build = |output: &str| {
            let mut graph = MaterialGraph::default();
            let sep = graph.create_node(NodeKind::SeparateXyz, [0.0, 0.0]).unwrap();
            let clamp = graph.create_node(NodeKind::Clamp, [0.0, 0.0]).unwrap();
            graph
                .create_link(pin(&graph, sep, output, true), pin(&graph, clamp, "Value", false))
                .unwrap();
            graph.compute_hash()
        };
        assert_ne!(build("X"), build("Y"));
    }

    #[test]
    fn param_and_default_type_checked() {
        let mut graph = MaterialGraph::default();
        let value = graph.create_node(NodeKind::Value, [0.0, 0.0]).unwrap();
        assert_eq!(
            graph.set_param(value, 0, PinValue::Vec3([1.0; 3])),
            Err(GraphError::ValueType {
                expected: PinType::Float,
                actual: PinType::Vec3
            })
        );
        assert!(matches!(
            graph.set_param(value, 3, PinValue::Float(1.0)),
            Err(GraphError::UnknownParam { index: 3, .. })
        ));

        let output = graph.active_output().unwrap();
        let surface = pin(&graph, output, "Surface", false);
        assert!(graph.set_pin_default(surface, PinValue::Float(1.0)).is_err());

        let clamp = graph.create_node(NodeKind::Clamp, [0.0, 0.0]).unwrap();
        let max = pin(&graph, clamp, "Max", false);
        assert_eq!(
            graph.set_pin_default(max, PinValue::Float(2.0)),
            Ok(PinValue::Float(1.0))
        );
    }

    #[test]
    fn serde_round_trip() {
        let graph = sample_graph(false);
        let bytes = bincode::serialize(&graph).unwrap();
        let decoded: MaterialGraph = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, graph);
        assert_eq!(decoded.compute_hash(), graph.compute_hash());
    }
}
