//! Layered control graph with pull-based, per-step cached evaluation.
//!
//! Nodes live in a flat arena per layer and refer to their sources by
//! [`NodeHandle`]. A source must already exist when an input is added, so the
//! graph is acyclic by construction and evaluation always terminates.

use serde::Serialize;

use crate::activation::Activation;
use crate::error::{ConfigError, Result};
use crate::model::{name_without_side, ActuatorId, SensorRef, Side, Simulation};

/// Stable (layer, index) address of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NodeHandle {
    pub layer: usize,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Sensor,
    Pattern,
    Inter,
    Motor,
}

/// Periodic gaussian pulse driven by simulation time only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pulse {
    /// Time of the first peak.
    pub t0: f64,
    pub sigma: f64,
    pub period: f64,
}

impl Pulse {
    pub fn value(&self, time: f64) -> f64 {
        // Wrap into [-period/2, period/2) around the nearest peak.
        let t = (time - self.t0 + 0.5 * self.period).rem_euclid(self.period) - 0.5 * self.period;
        (-(t * t) / (self.sigma * self.sigma)).exp()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Sensor { sensor: SensorRef, delay: f64 },
    Pattern(Pulse),
    Inter,
    Motor { actuator: ActuatorId },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Input {
    pub source: NodeHandle,
    pub gain: f64,
    /// Added to the source's summed input before its activation.
    pub offset: f64,
    /// Running sum of |gain * source output|, for diagnostics only.
    pub contribution: f64,
}

impl Input {
    pub fn new(source: NodeHandle, gain: f64, offset: f64) -> Self {
        Self {
            source,
            gain,
            offset,
            contribution: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StepCache {
    step: Option<u64>,
    sum: f64,
    output: f64,
    busy: bool,
}

#[derive(Debug, Clone)]
pub struct Node {
    /// Full name, including any side suffix.
    pub name: String,
    pub side: Side,
    /// Sensor channel (`F`, `DP`, ...), layer name for interneurons.
    pub type_tag: String,
    /// Underlying actuator, when the node stands for one.
    pub actuator: Option<ActuatorId>,
    pub kind: NodeKind,
    pub activation: Activation,
    pub offset: f64,

    index: usize,
    inputs: Vec<Input>,
    cache: StepCache,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        side: Side,
        type_tag: impl Into<String>,
        kind: NodeKind,
        activation: Activation,
    ) -> Self {
        let actuator = match &kind {
            NodeKind::Sensor { sensor, .. } => sensor.actuator(),
            NodeKind::Motor { actuator } => Some(*actuator),
            _ => None,
        };
        Self {
            name: name.into(),
            side,
            type_tag: type_tag.into(),
            actuator,
            kind,
            activation,
            offset: 0.0,
            index: 0,
            inputs: Vec::new(),
            cache: StepCache::default(),
        }
    }

    pub fn with_actuator(mut self, actuator: ActuatorId) -> Self {
        self.actuator = Some(actuator);
        self
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// Position within the owning layer.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Side-less name used to build parameter names.
    pub fn par_name(&self) -> &str {
        name_without_side(&self.name)
    }

    /// Output of the most recent evaluation.
    pub fn output(&self) -> f64 {
        self.cache.output
    }

    /// Summed input (before activation) of the most recent evaluation.
    pub fn input_sum(&self) -> f64 {
        self.cache.sum
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    kind: LayerKind,
    nodes: Vec<Node>,
}

impl Layer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NeuralNetwork {
    layers: Vec<Layer>,
    step: u64,
}

impl NeuralNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, name: &str, kind: LayerKind) -> Result<usize> {
        if self.layer_index(name).is_some() {
            return Err(ConfigError::DuplicateLayer(name.to_string()));
        }
        self.layers.push(Layer {
            name: name.to_string(),
            kind,
            nodes: Vec::new(),
        });
        Ok(self.layers.len() - 1)
    }

    pub fn add_node(&mut self, layer: usize, mut node: Node) -> NodeHandle {
        let nodes = &mut self.layers[layer].nodes;
        node.index = nodes.len();
        nodes.push(node);
        NodeHandle {
            layer,
            index: nodes.len() - 1,
        }
    }

    /// Connects `input.source` into `target`.
    ///
    /// The source must come from an earlier layer, or from the same layer at a
    /// lower index; anything else could make evaluation re-enter a node.
    pub fn add_input(&mut self, target: NodeHandle, input: Input) -> Result<()> {
        let source = input.source;
        let exists = |h: NodeHandle| {
            self.layers
                .get(h.layer)
                .is_some_and(|l| h.index < l.nodes.len())
        };
        let ordered = source.layer < target.layer
            || (source.layer == target.layer && source.index < target.index);
        if !exists(target) || !exists(source) || !ordered {
            return Err(ConfigError::ForwardReference {
                target: self.describe(target),
                source_node: self.describe(source),
            });
        }
        self.layers[target.layer].nodes[target.index]
            .inputs
            .push(input);
        Ok(())
    }

    fn describe(&self, h: NodeHandle) -> String {
        match self.layers.get(h.layer).and_then(|l| l.nodes.get(h.index)) {
            Some(n) => n.name.clone(),
            None => format!("<{}:{}>", h.layer, h.index),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, layer: usize) -> &Layer {
        &self.layers[layer]
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    pub fn node(&self, h: NodeHandle) -> &Node {
        &self.layers[h.layer].nodes[h.index]
    }

    pub fn node_count(&self) -> usize {
        self.layers.iter().map(|l| l.nodes.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.nodes.iter())
            .map(|n| n.inputs.len())
            .sum()
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Starts a new control step; every cached output becomes stale.
    pub fn advance(&mut self) {
        self.step += 1;
    }

    /// Output of `h` for the current step, computed at most once per step.
    pub fn evaluate<S: Simulation + ?Sized>(&mut self, sim: &S, h: NodeHandle) -> f64 {
        self.summed_input(sim, h);
        self.node(h).cache.output
    }

    /// Output of `h` as seen through an edge that adds `offset` before the activation.
    pub fn evaluate_with_offset<S: Simulation + ?Sized>(
        &mut self,
        sim: &S,
        h: NodeHandle,
        offset: f64,
    ) -> f64 {
        let sum = self.summed_input(sim, h);
        if offset == 0.0 {
            self.node(h).cache.output
        } else {
            self.node(h).activation.apply(sum + offset)
        }
    }

    fn summed_input<S: Simulation + ?Sized>(&mut self, sim: &S, h: NodeHandle) -> f64 {
        let step = self.step;
        let node = &mut self.layers[h.layer].nodes[h.index];
        if node.cache.step == Some(step) {
            return node.cache.sum;
        }
        if node.cache.busy {
            debug_assert!(false, "re-entrant evaluation of {}", node.name);
            return node.cache.sum;
        }
        node.cache.busy = true;

        let mut sum = node.offset
            + match &node.kind {
                NodeKind::Sensor { sensor, delay } => sim.delayed_value(*sensor, *delay),
                NodeKind::Pattern(pulse) => pulse.value(sim.time()),
                NodeKind::Inter | NodeKind::Motor { .. } => 0.0,
            };

        let count = node.inputs.len();
        for i in 0..count {
            let input = self.layers[h.layer].nodes[h.index].inputs[i];
            let value = input.gain * self.evaluate_with_offset(sim, input.source, input.offset);
            self.layers[h.layer].nodes[h.index].inputs[i].contribution += value.abs();
            sum += value;
        }

        let node = &mut self.layers[h.layer].nodes[h.index];
        node.cache = StepCache {
            step: Some(step),
            sum,
            output: node.activation.apply(sum),
            busy: false,
        };
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SensorKind;
    use crate::testbed::Testbed;

    fn sensor_node(name: &str, sensor: SensorRef) -> Node {
        Node::new(
            name,
            Side::from_name(name),
            sensor.kind.tag(),
            NodeKind::Sensor { sensor, delay: 0.0 },
            Activation::Linear,
        )
    }

    fn two_layer(body: &mut Testbed) -> (NeuralNetwork, NodeHandle, NodeHandle) {
        let force = SensorRef::muscle(SensorKind::Force, 0);
        body.set_override(force, 2.0);

        let mut net = NeuralNetwork::new();
        let s = net.add_layer("0", LayerKind::Sensor).unwrap();
        let m = net.add_layer("motor", LayerKind::Motor).unwrap();
        let src = net.add_node(s, sensor_node("iliopsoas_l", force));
        let dst = net.add_node(
            m,
            Node::new(
                "iliopsoas_l",
                Side::Left,
                "M",
                NodeKind::Motor { actuator: 0 },
                Activation::Rectifier,
            )
            .with_offset(0.1),
        );
        net.add_input(dst, Input::new(src, 0.5, 0.0)).unwrap();
        (net, src, dst)
    }

    #[test]
    fn node_without_inputs_is_activated_offset() {
        let body = Testbed::new();
        let mut net = NeuralNetwork::new();
        let l = net.add_layer("N1", LayerKind::Inter).unwrap();
        let h = net.add_node(
            l,
            Node::new("N1_0", Side::None, "N1", NodeKind::Inter, Activation::Rectifier)
                .with_offset(-0.4),
        );
        net.advance();
        assert_eq!(net.evaluate(&body, h), 0.0);
        assert_eq!(net.node(h).input_sum(), -0.4);
    }

    #[test]
    fn weighted_sum_through_activation() {
        let mut body = Testbed::new();
        let (mut net, _, dst) = two_layer(&mut body);
        net.advance();
        assert!((net.evaluate(&body, dst) - 1.1).abs() < 1e-12);
    }

    #[test]
    fn cached_within_step_and_deterministic_across_steps() {
        let mut body = Testbed::new();
        let (mut net, src, dst) = two_layer(&mut body);
        net.advance();
        let first = net.evaluate(&body, dst);
        // Changing the sensor mid-step must not leak into the cached value.
        body.set_override(SensorRef::muscle(SensorKind::Force, 0), 10.0);
        assert_eq!(net.evaluate(&body, dst), first);
        assert_eq!(net.node(dst).inputs()[0].contribution, 1.0);

        body.set_override(SensorRef::muscle(SensorKind::Force, 0), 2.0);
        net.advance();
        assert_eq!(net.evaluate(&body, dst), first);
        assert_eq!(net.node(src).output(), 2.0);
        assert_eq!(net.node(dst).inputs()[0].contribution, 2.0);
    }

    #[test]
    fn edge_offset_applies_before_source_activation() {
        let mut body = Testbed::new();
        let (mut net, src, _) = two_layer(&mut body);
        net.advance();
        assert_eq!(net.evaluate_with_offset(&body, src, -0.5), 1.5);
        assert_eq!(net.evaluate(&body, src), 2.0);
    }

    #[test]
    fn forward_and_self_references_are_rejected() {
        let mut body = Testbed::new();
        let (mut net, src, dst) = two_layer(&mut body);
        assert!(matches!(
            net.add_input(src, Input::new(dst, 1.0, 0.0)),
            Err(ConfigError::ForwardReference { .. })
        ));
        assert!(net.add_input(dst, Input::new(dst, 1.0, 0.0)).is_err());
        let missing = NodeHandle { layer: 0, index: 9 };
        assert!(net.add_input(dst, Input::new(missing, 1.0, 0.0)).is_err());
        assert_eq!(net.edge_count(), 1);
    }

    #[test]
    fn duplicate_layer_names_rejected() {
        let mut net = NeuralNetwork::new();
        net.add_layer("N1", LayerKind::Inter).unwrap();
        assert!(matches!(
            net.add_layer("N1", LayerKind::Inter),
            Err(ConfigError::DuplicateLayer(_))
        ));
    }

    #[test]
    fn pulse_peaks_at_origin_and_repeats() {
        let p = Pulse {
            t0: 0.2,
            sigma: 0.1,
            period: 1.0,
        };
        assert!((p.value(0.2) - 1.0).abs() < 1e-12);
        assert!((p.value(1.2) - 1.0).abs() < 1e-9);
        assert!((p.value(-0.8) - 1.0).abs() < 1e-9);
        assert!(p.value(0.7) < 1e-6);
        assert!((p.value(0.3) - p.value(0.1)).abs() < 1e-9);
    }
}
