//! Animated value graph
//!
//! Animated nodes form a DAG from raw values up to the props objects that a
//! renderer consumes:
//!
//! ```text
//!        AnimatedValue(0)            AnimatedValue(1)
//!     .interpolate()   .interpolate()       |
//!       opacity          translate        scale
//!          \________________|_______________/
//!                   AnimatedObject (props)
//! ```
//!
//! Nodes live in an arena ([`AnimatedGraph`]) and refer to each other by
//! [`NodeId`]. Every node keeps a list of consumers ("children"). A node only
//! registers itself with its own sources while it has at least one consumer,
//! so updates never propagate through parts of the graph nobody reads.
//!
//! Writing to a value node marks every props object reachable through
//! consumer edges as dirty. [`deliver_updates`] later hands each dirty props
//! object its patch through its apply callback.
//!
//! ```
//! use sprig_core::animated::{deliver_updates, AnimatedGraph, Field};
//! use sprig_core::value::Value;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let graph = AnimatedGraph::shared();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//!
//! let opacity = graph.borrow_mut().create_value(Value::from(0.0));
//! let sink = seen.clone();
//! graph.borrow_mut().create_props(
//!     [("opacity".to_string(), Field::Node(opacity))],
//!     move |patch: &Value| {
//!         sink.borrow_mut().push(patch.clone());
//!         true
//!     },
//! );
//!
//! graph.borrow_mut().set_value(opacity, Value::from(0.5), true);
//! deliver_updates(&graph);
//! assert_eq!(seen.borrow().len(), 1);
//! ```

use indexmap::{IndexMap, IndexSet};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::color::ColorNames;
use crate::error::Result;
use crate::interpolation::{Interpolator, InterpolatorSpec};
use crate::value::{Value, ValueMap};

new_key_type! {
    /// Unique identifier for an animated node
    pub struct NodeId;
}

/// Node list used for consumer and source edges
pub type NodeList = SmallVec<[NodeId; 4]>;

/// Callback that receives a props object's values. Returning `false` rejects
/// the values and asks for a full re-delivery.
pub type ApplyFn = Box<dyn FnMut(&Value) -> bool>;

/// Graph shared between controllers of one scheduler
pub type SharedAnimatedGraph = Rc<RefCell<AnimatedGraph>>;

/// Entry of an object node
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Node(NodeId),
    Literal(Value),
}

impl From<NodeId> for Field {
    fn from(id: NodeId) -> Self {
        Field::Node(id)
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Literal(value)
    }
}

// ============================================================================
// Node types
// ============================================================================

/// Capabilities shared by every node type
pub trait Animated {
    /// Nodes this node reads from, in order (duplicates kept)
    fn sources(&self) -> NodeList;

    /// Fully resolved value
    fn get_value(&self, graph: &AnimatedGraph) -> Value;

    /// Value restricted to animated parts, used to build renderer patches
    fn get_animated_value(&self, graph: &AnimatedGraph) -> Value {
        self.get_value(graph)
    }

    /// Point every reference to `prev` at `next` instead
    fn replace_source(&mut self, _prev: NodeId, _next: NodeId) {}
}

/// A scalar that the integrator writes to
#[derive(Clone, Debug, PartialEq)]
pub struct AnimatedValue {
    pub value: Value,
    pub start_position: Value,
    pub last_position: Value,
    pub last_velocity: Option<f64>,
    pub start_time: f64,
    pub last_time: Option<f64>,
    pub done: bool,
}

impl AnimatedValue {
    pub fn new(value: Value) -> Self {
        Self {
            start_position: value.clone(),
            last_position: value.clone(),
            value,
            last_velocity: None,
            start_time: 0.0,
            last_time: None,
            done: false,
        }
    }

    /// Restart from the current value. Velocity and timing carry over only
    /// while the animation is already in flight.
    pub fn reset(&mut self, is_active: bool, now: f64) {
        self.start_position = self.value.clone();
        self.last_position = self.value.clone();
        if !is_active {
            self.last_velocity = None;
            self.last_time = None;
        }
        self.start_time = now;
        self.done = false;
    }
}

impl Animated for AnimatedValue {
    fn sources(&self) -> NodeList {
        NodeList::new()
    }

    fn get_value(&self, _graph: &AnimatedGraph) -> Value {
        self.value.clone()
    }
}

/// An ordered list of value nodes animated element-wise
#[derive(Clone, Debug, PartialEq)]
pub struct AnimatedValueArray {
    pub children: Vec<NodeId>,
}

impl Animated for AnimatedValueArray {
    fn sources(&self) -> NodeList {
        self.children.iter().copied().collect()
    }

    fn get_value(&self, graph: &AnimatedGraph) -> Value {
        Value::Array(self.children.iter().map(|&c| graph.get_value(c)).collect())
    }

    fn replace_source(&mut self, prev: NodeId, next: NodeId) {
        for child in &mut self.children {
            if *child == prev {
                *child = next;
            }
        }
    }
}

/// A keyed composite of nodes and literals. With an apply callback it is a
/// props object: the endpoint a renderer listens on.
pub struct AnimatedObject {
    pub fields: IndexMap<String, Field>,
    apply: Option<ApplyFn>,
    is_props: bool,
    stale: bool,
}

impl AnimatedObject {
    pub fn new(fields: IndexMap<String, Field>) -> Self {
        Self {
            fields,
            apply: None,
            is_props: false,
            stale: false,
        }
    }

    pub fn is_props(&self) -> bool {
        self.is_props
    }
}

impl Animated for AnimatedObject {
    fn sources(&self) -> NodeList {
        self.fields
            .values()
            .filter_map(|f| match f {
                Field::Node(id) => Some(*id),
                Field::Literal(_) => None,
            })
            .collect()
    }

    fn get_value(&self, graph: &AnimatedGraph) -> Value {
        let map: ValueMap = self
            .fields
            .iter()
            .map(|(k, f)| {
                let v = match f {
                    Field::Node(id) => graph.get_value(*id),
                    Field::Literal(v) => v.clone(),
                };
                (k.clone(), v)
            })
            .collect();
        Value::Map(map)
    }

    fn get_animated_value(&self, graph: &AnimatedGraph) -> Value {
        let map: ValueMap = self
            .fields
            .iter()
            .filter_map(|(k, f)| match f {
                Field::Node(id) => Some((k.clone(), graph.get_animated_value(*id))),
                Field::Literal(_) => None,
            })
            .collect();
        Value::Map(map)
    }

    fn replace_source(&mut self, prev: NodeId, next: NodeId) {
        for field in self.fields.values_mut() {
            if *field == Field::Node(prev) {
                *field = Field::Node(next);
            }
        }
    }
}

impl fmt::Debug for AnimatedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimatedObject")
            .field("fields", &self.fields)
            .field("is_props", &self.is_props)
            .field("stale", &self.stale)
            .finish()
    }
}

/// A value derived from other nodes
#[derive(Clone, Debug)]
pub struct AnimatedInterpolation {
    pub inputs: NodeList,
    pub calc: Interpolator,
}

impl Animated for AnimatedInterpolation {
    fn sources(&self) -> NodeList {
        self.inputs.clone()
    }

    fn get_value(&self, graph: &AnimatedGraph) -> Value {
        let inputs: SmallVec<[Value; 4]> = self.inputs.iter().map(|&i| graph.get_value(i)).collect();
        self.calc.apply(&inputs)
    }

    fn replace_source(&mut self, prev: NodeId, next: NodeId) {
        for input in &mut self.inputs {
            if *input == prev {
                *input = next;
            }
        }
    }
}

/// Any node stored in the graph
#[derive(Debug)]
pub enum AnimatedNode {
    Value(AnimatedValue),
    ValueArray(AnimatedValueArray),
    Object(AnimatedObject),
    Interpolation(AnimatedInterpolation),
}

impl AnimatedNode {
    pub fn as_animated(&self) -> &dyn Animated {
        match self {
            AnimatedNode::Value(n) => n,
            AnimatedNode::ValueArray(n) => n,
            AnimatedNode::Object(n) => n,
            AnimatedNode::Interpolation(n) => n,
        }
    }

    pub fn as_animated_mut(&mut self) -> &mut dyn Animated {
        match self {
            AnimatedNode::Value(n) => n,
            AnimatedNode::ValueArray(n) => n,
            AnimatedNode::Object(n) => n,
            AnimatedNode::Interpolation(n) => n,
        }
    }

    fn is_props(&self) -> bool {
        matches!(self, AnimatedNode::Object(o) if o.is_props)
    }
}

// ============================================================================
// Graph
// ============================================================================

struct Slot {
    node: AnimatedNode,
    children: NodeList,
    /// Props objects reachable from this node, valid for one topology version
    styles: Option<(u64, NodeList)>,
}

/// Statistics about the graph
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: usize,
    pub values: usize,
    pub edges: usize,
    pub dirty: usize,
}

/// Arena holding every animated node
pub struct AnimatedGraph {
    nodes: SlotMap<NodeId, Slot>,
    /// Bumped on every edge change; invalidates cached style sets
    topology: u64,
    dirty: IndexSet<NodeId>,
}

impl Default for AnimatedGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimatedGraph {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            topology: 0,
            dirty: IndexSet::new(),
        }
    }

    pub fn shared() -> SharedAnimatedGraph {
        Rc::new(RefCell::new(Self::new()))
    }

    fn insert(&mut self, node: AnimatedNode) -> NodeId {
        self.nodes.insert(Slot {
            node,
            children: NodeList::new(),
            styles: None,
        })
    }

    // ========================================================================
    // Construction
    // ========================================================================

    pub fn create_value(&mut self, value: Value) -> NodeId {
        self.insert(AnimatedNode::Value(AnimatedValue::new(value)))
    }

    /// One value node per element
    pub fn create_value_array(&mut self, values: &[Value]) -> NodeId {
        let children = values.iter().map(|v| self.create_value(v.clone())).collect();
        self.create_value_array_from(children)
    }

    pub fn create_value_array_from(&mut self, children: Vec<NodeId>) -> NodeId {
        self.insert(AnimatedNode::ValueArray(AnimatedValueArray { children }))
    }

    pub fn create_object<I>(&mut self, fields: I) -> NodeId
    where
        I: IntoIterator<Item = (String, Field)>,
    {
        self.insert(AnimatedNode::Object(AnimatedObject::new(fields.into_iter().collect())))
    }

    /// Create a props object. Props objects are consumers by definition, so
    /// they hook into their sources right away.
    pub fn create_props<I, F>(&mut self, fields: I, apply: F) -> NodeId
    where
        I: IntoIterator<Item = (String, Field)>,
        F: FnMut(&Value) -> bool + 'static,
    {
        let mut object = AnimatedObject::new(fields.into_iter().collect());
        object.apply = Some(Box::new(apply));
        object.is_props = true;
        let id = self.insert(AnimatedNode::Object(object));
        self.attach(id);
        id
    }

    pub fn create_interpolation(&mut self, inputs: NodeList, calc: Interpolator) -> NodeId {
        self.insert(AnimatedNode::Interpolation(AnimatedInterpolation { inputs, calc }))
    }

    /// Derive a node from `parent`. A value array contributes one input per
    /// element; anything else is a single input.
    pub fn interpolate(
        &mut self,
        parent: NodeId,
        spec: impl Into<InterpolatorSpec>,
        names: &ColorNames,
    ) -> Result<NodeId> {
        let calc = Interpolator::build(spec, names)?;
        let inputs: NodeList = match self.node(parent) {
            Some(AnimatedNode::ValueArray(array)) => array.children.iter().copied().collect(),
            _ => smallvec::smallvec![parent],
        };
        Ok(self.create_interpolation(inputs, calc))
    }

    // ========================================================================
    // Edges
    // ========================================================================

    /// Register `consumer` as reading from `node`
    pub fn add_child(&mut self, node: NodeId, consumer: NodeId) {
        let first = match self.nodes.get(node) {
            Some(slot) => slot.children.is_empty(),
            None => return,
        };
        if first {
            self.attach(node);
        }
        if let Some(slot) = self.nodes.get_mut(node) {
            slot.children.push(consumer);
        }
        self.topology += 1;
    }

    /// Drop one `consumer` edge from `node`
    pub fn remove_child(&mut self, node: NodeId, consumer: NodeId) {
        let now_empty = match self.nodes.get_mut(node) {
            Some(slot) => match slot.children.iter().position(|&c| c == consumer) {
                Some(index) => {
                    slot.children.remove(index);
                    slot.children.is_empty()
                }
                None => return,
            },
            None => return,
        };
        self.topology += 1;
        if now_empty && !self.nodes.get(node).is_some_and(|s| s.node.is_props()) {
            self.detach(node);
        }
    }

    fn attach(&mut self, node: NodeId) {
        for source in self.sources(node) {
            self.add_child(source, node);
        }
    }

    fn detach(&mut self, node: NodeId) {
        for source in self.sources(node) {
            self.remove_child(source, node);
        }
    }

    /// Move every consumer of `prev` onto `next`, rewriting the consumer's
    /// reference as well
    pub fn move_children(&mut self, prev: NodeId, next: NodeId) {
        if prev == next {
            return;
        }
        for child in self.children(prev) {
            self.remove_child(prev, child);
            self.add_child(next, child);
            if let Some(slot) = self.nodes.get_mut(child) {
                slot.node.as_animated_mut().replace_source(prev, next);
            }
        }
    }

    pub fn children(&self, node: NodeId) -> NodeList {
        self.nodes.get(node).map(|s| s.children.clone()).unwrap_or_default()
    }

    pub fn sources(&self, node: NodeId) -> NodeList {
        self.nodes
            .get(node)
            .map(|s| s.node.as_animated().sources())
            .unwrap_or_default()
    }

    // ========================================================================
    // Reading
    // ========================================================================

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node(&self, node: NodeId) -> Option<&AnimatedNode> {
        self.nodes.get(node).map(|s| &s.node)
    }

    pub fn value(&self, node: NodeId) -> Option<&AnimatedValue> {
        match self.node(node) {
            Some(AnimatedNode::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn value_mut(&mut self, node: NodeId) -> Option<&mut AnimatedValue> {
        match self.nodes.get_mut(node).map(|s| &mut s.node) {
            Some(AnimatedNode::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Resolved value; a removed node reads as `Null`
    pub fn get_value(&self, node: NodeId) -> Value {
        self.node(node)
            .map(|n| n.as_animated().get_value(self))
            .unwrap_or_default()
    }

    pub fn get_animated_value(&self, node: NodeId) -> Value {
        self.node(node)
            .map(|n| n.as_animated().get_animated_value(self))
            .unwrap_or_default()
    }

    /// The value nodes that actually move: the node itself for a value, the
    /// elements of an array, the inputs of an interpolation
    pub fn payload(&self, node: NodeId) -> NodeList {
        match self.node(node) {
            Some(AnimatedNode::ValueArray(a)) => a.children.iter().copied().collect(),
            Some(AnimatedNode::Interpolation(i)) => i.inputs.clone(),
            Some(_) => smallvec::smallvec![node],
            None => NodeList::new(),
        }
    }

    /// Whether a value node has settled. Anything that is not a value node
    /// counts as settled.
    pub fn is_done(&self, node: NodeId) -> bool {
        self.value(node).map_or(true, |v| v.done)
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write a value node, or every element of a value array. Arrays accept
    /// either a same-length array or a scalar applied to all elements.
    pub fn set_value(&mut self, node: NodeId, value: Value, flush: bool) {
        let children = match self.nodes.get_mut(node).map(|s| &mut s.node) {
            Some(AnimatedNode::Value(v)) => {
                v.value = value;
                if flush {
                    self.flush(node);
                }
                return;
            }
            Some(AnimatedNode::ValueArray(a)) => a.children.clone(),
            _ => return,
        };
        match value {
            Value::Array(items) if items.len() == children.len() => {
                for (child, item) in children.into_iter().zip(items) {
                    self.set_value(child, item, flush);
                }
            }
            other => {
                for child in children {
                    self.set_value(child, other.clone(), flush);
                }
            }
        }
    }

    /// Reset a value node, or every element of a value array
    pub fn reset_value(&mut self, node: NodeId, is_active: bool, now: f64) {
        for id in self.payload(node) {
            if let Some(v) = self.value_mut(id) {
                v.reset(is_active, now);
            }
        }
    }

    /// Mark every props object reachable from `node` as dirty
    pub fn flush(&mut self, node: NodeId) {
        let Some(slot) = self.nodes.get(node) else {
            return;
        };
        let styles = match &slot.styles {
            Some((version, styles)) if *version == self.topology => styles.clone(),
            _ => {
                let mut styles = NodeList::new();
                self.collect_styles(node, &mut styles);
                let version = self.topology;
                if let Some(slot) = self.nodes.get_mut(node) {
                    slot.styles = Some((version, styles.clone()));
                }
                styles
            }
        };
        self.dirty.extend(styles);
    }

    fn collect_styles(&self, node: NodeId, out: &mut NodeList) {
        let Some(slot) = self.nodes.get(node) else {
            return;
        };
        for &child in &slot.children {
            match self.nodes.get(child) {
                Some(c) if c.node.is_props() => {
                    if !out.contains(&child) {
                        out.push(child);
                    }
                }
                Some(_) => self.collect_styles(child, out),
                None => {}
            }
        }
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove a node regardless of consumers. Consumers keep the stale id,
    /// which reads as `Null` from now on.
    pub fn remove(&mut self, node: NodeId) -> Option<AnimatedNode> {
        let sources = self.sources(node);
        let attached = self
            .nodes
            .get(node)
            .is_some_and(|s| !s.children.is_empty() || s.node.is_props());
        if attached {
            for source in sources {
                self.remove_child(source, node);
            }
        }
        self.dirty.shift_remove(&node);
        self.topology += 1;
        self.nodes.remove(node).map(|s| s.node)
    }

    /// Remove `node` if nothing consumes it, then do the same for its
    /// sources. Nodes listed in `keep` survive.
    pub fn release(&mut self, node: NodeId, keep: &[NodeId]) {
        if keep.contains(&node) || !self.contains(node) || !self.children(node).is_empty() {
            return;
        }
        if self.node(node).is_some_and(AnimatedNode::is_props) {
            return;
        }
        let sources = self.sources(node);
        self.remove(node);
        for source in sources {
            self.release(source, keep);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.nodes.len(),
            values: self
                .nodes
                .values()
                .filter(|s| matches!(s.node, AnimatedNode::Value(_)))
                .count(),
            edges: self.nodes.values().map(|s| s.children.len()).sum(),
            dirty: self.dirty.len(),
        }
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Drain dirty props objects, computing each patch and lending out the
    /// apply callback
    fn take_pending(&mut self) -> Vec<(NodeId, Value, ApplyFn)> {
        let dirty: Vec<NodeId> = self.dirty.drain(..).collect();
        let mut pending = Vec::with_capacity(dirty.len());
        for id in dirty {
            let stale = matches!(self.node(id), Some(AnimatedNode::Object(o)) if o.stale);
            let value = if stale {
                self.get_value(id)
            } else {
                self.get_animated_value(id)
            };
            if let Some(AnimatedNode::Object(object)) = self.nodes.get_mut(id).map(|s| &mut s.node) {
                if let Some(apply) = object.apply.take() {
                    pending.push((id, value, apply));
                }
            }
        }
        pending
    }

    fn restore_apply(&mut self, id: NodeId, apply: ApplyFn, accepted: bool) {
        if let Some(AnimatedNode::Object(object)) = self.nodes.get_mut(id).map(|s| &mut s.node) {
            if object.apply.is_none() {
                object.apply = Some(apply);
            }
            object.stale = !accepted;
            if !accepted {
                self.dirty.insert(id);
            }
        }
    }
}

impl fmt::Debug for AnimatedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimatedGraph").field("stats", &self.stats()).finish()
    }
}

/// Hand every dirty props object its values. Callbacks run with the graph
/// unborrowed, so they may read from it. Returns how many were delivered.
pub fn deliver_updates(graph: &SharedAnimatedGraph) -> usize {
    let pending = graph.borrow_mut().take_pending();
    let delivered = pending.len();
    for (id, value, mut apply) in pending {
        let accepted = apply(&value);
        if !accepted {
            tracing::debug!("props {:?} rejected values; queued for full re-delivery", id);
        }
        graph.borrow_mut().restore_apply(id, apply, accepted);
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolation::InterpolationConfig;
    use crate::value::value_map;

    fn recorder() -> (Rc<RefCell<Vec<Value>>>, impl FnMut(&Value) -> bool) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &Value| {
            sink.borrow_mut().push(v.clone());
            true
        })
    }

    #[test]
    fn test_lazy_attach_and_detach() {
        let mut graph = AnimatedGraph::new();
        let names = ColorNames::shared();
        let v = graph.create_value(Value::from(0.0));
        let interp = graph
            .interpolate(v, InterpolationConfig::new(vec![0.0, 10.0]), &names)
            .unwrap();

        // nothing consumes the interpolation yet
        assert!(graph.children(v).is_empty());

        let props = graph.create_props([("x".to_string(), Field::Node(interp))], |_: &Value| true);
        assert_eq!(graph.children(interp).as_slice(), &[props]);
        assert_eq!(graph.children(v).as_slice(), &[interp]);

        graph.remove(props);
        assert!(graph.children(interp).is_empty());
        assert!(graph.children(v).is_empty());
    }

    #[test]
    fn test_values_resolve_through_graph() {
        let mut graph = AnimatedGraph::new();
        let names = ColorNames::shared();
        let v = graph.create_value(Value::from(0.5));
        let interp = graph
            .interpolate(v, InterpolationConfig::new(vec![0.0, 10.0]), &names)
            .unwrap();
        let object = graph.create_object([
            ("x".to_string(), Field::Node(interp)),
            ("label".to_string(), Field::Literal(Value::from("box"))),
        ]);

        assert_eq!(
            graph.get_value(object),
            Value::Map(value_map([("x", Value::from(5.0)), ("label", Value::from("box"))]))
        );
        assert_eq!(
            graph.get_animated_value(object),
            Value::Map(value_map([("x", 5.0)]))
        );
    }

    #[test]
    fn test_flush_reaches_props_once() {
        let graph = AnimatedGraph::shared();
        let (seen, apply) = recorder();
        let (a, b) = {
            let mut g = graph.borrow_mut();
            let a = g.create_value(Value::from(0.0));
            let b = g.create_value(Value::from(0.0));
            g.create_props(
                [("a".to_string(), Field::Node(a)), ("b".to_string(), Field::Node(b))],
                apply,
            );
            (a, b)
        };

        {
            let mut g = graph.borrow_mut();
            g.set_value(a, Value::from(1.0), true);
            g.set_value(b, Value::from(2.0), true);
        }
        assert_eq!(deliver_updates(&graph), 1);
        assert_eq!(seen.borrow()[0], Value::Map(value_map([("a", 1.0), ("b", 2.0)])));

        // unflushed writes are not delivered
        graph.borrow_mut().set_value(a, Value::from(3.0), false);
        assert_eq!(deliver_updates(&graph), 0);
    }

    #[test]
    fn test_rejected_values_are_redelivered_in_full() {
        let graph = AnimatedGraph::shared();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        let v = {
            let mut g = graph.borrow_mut();
            let v = g.create_value(Value::from(0.0));
            g.create_props(
                [
                    ("v".to_string(), Field::Node(v)),
                    ("fixed".to_string(), Field::Literal(Value::from(true))),
                ],
                move |value: &Value| {
                    sink.borrow_mut().push(value.clone());
                    sink.borrow().len() > 1
                },
            );
            v
        };

        graph.borrow_mut().set_value(v, Value::from(1.0), true);
        deliver_updates(&graph);
        deliver_updates(&graph);
        assert_eq!(deliver_updates(&graph), 0);

        let calls = calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], Value::Map(value_map([("v", 1.0)])));
        assert_eq!(
            calls[1],
            Value::Map(value_map([("v", Value::from(1.0)), ("fixed", Value::from(true))]))
        );
    }

    #[test]
    fn test_move_children_migrates_edges() {
        let mut graph = AnimatedGraph::new();
        let old = graph.create_value(Value::from(1.0));
        let props = graph.create_props([("x".to_string(), Field::Node(old))], |_: &Value| true);
        let new = graph.create_value(Value::from(2.0));

        graph.move_children(old, new);

        assert!(graph.children(old).is_empty());
        assert_eq!(graph.children(new).as_slice(), &[props]);
        assert_eq!(graph.get_value(props), Value::Map(value_map([("x", 2.0)])));

        graph.release(old, &[]);
        assert!(!graph.contains(old));
    }

    #[test]
    fn test_value_array_writes() {
        let mut graph = AnimatedGraph::new();
        let array = graph.create_value_array(&[Value::from(0.0), Value::from(0.0)]);

        graph.set_value(array, Value::from(vec![1.0, 2.0]), false);
        assert_eq!(graph.get_value(array), Value::from(vec![1.0, 2.0]));

        graph.set_value(array, Value::from(7.0), false);
        assert_eq!(graph.get_value(array), Value::from(vec![7.0, 7.0]));
        assert_eq!(graph.payload(array).len(), 2);
    }

    #[test]
    fn test_reset_keeps_velocity_only_when_active() {
        let mut graph = AnimatedGraph::new();
        let v = graph.create_value(Value::from(3.0));
        {
            let value = graph.value_mut(v).unwrap();
            value.last_velocity = Some(4.0);
            value.last_time = Some(10.0);
            value.done = true;
        }

        graph.reset_value(v, true, 20.0);
        let value = graph.value(v).unwrap();
        assert_eq!(value.last_velocity, Some(4.0));
        assert_eq!(value.start_time, 20.0);
        assert!(!value.done);

        graph.reset_value(v, false, 30.0);
        let value = graph.value(v).unwrap();
        assert_eq!(value.last_velocity, None);
        assert_eq!(value.last_time, None);
        assert_eq!(value.start_position, Value::from(3.0));
    }

    #[test]
    fn test_removed_nodes_read_as_null() {
        let mut graph = AnimatedGraph::new();
        let v = graph.create_value(Value::from(1.0));
        let object = graph.create_object([("v".to_string(), Field::Node(v))]);
        graph.remove(v);
        assert_eq!(graph.get_value(v), Value::Null);
        assert_eq!(graph.get_value(object), Value::Map(value_map([("v", Value::Null)])));
        assert_eq!(graph.stats().nodes, 1);
    }
}
