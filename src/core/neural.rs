//! Layered neural controller: sensors, pattern generators, interneurons and
//! one motor node per actuator, wired by declarative connection rules.

use tracing::{debug, warn};

use crate::activation::Activation;
use crate::config::{fix_layer_name, ConnectionDecl, InterLayerDecl, NeuralConfig, PatternLayerDecl};
use crate::connection::{ConnectionKind, ConnectionParams, ConnectionResolver, Target};
use crate::correlation::{CorrelationCache, ParameterMode, Role};
use crate::error::{ConfigError, Result};
use crate::model::{
    name_without_side, pattern_match, ActuatorId, Anatomy, SensorKind, SensorRef, Side, Simulation,
};
use crate::network::{Input, LayerKind, NeuralNetwork, Node, NodeHandle, NodeKind, Pulse};
use crate::params::ParamSet;

pub const SENSOR_LAYER: &str = "0";
pub const PATTERN_LAYER: &str = "CPG";
pub const MOTOR_LAYER: &str = "motor";

#[derive(Debug, Clone)]
pub struct NeuralController {
    network: NeuralNetwork,
    motors: Vec<(NodeHandle, ActuatorId)>,
    outputs: Vec<f64>,
    mode: ParameterMode,
}

struct Builder<'a, 'p, A: Anatomy + ?Sized> {
    config: &'a NeuralConfig,
    anatomy: &'a A,
    net: NeuralNetwork,
    resolver: ConnectionResolver<'p, A>,
}

impl<'a, 'p, A: Anatomy + ?Sized> Builder<'a, 'p, A> {
    fn sensor_layer(&mut self) -> Result<()> {
        let (config, anatomy) = (self.config, self.anatomy);
        let layer = self.net.add_layer(SENSOR_LAYER, LayerKind::Sensor)?;
        for decl in &config.sensors {
            let kind = SensorKind::from_tag(&decl.kind)
                .ok_or_else(|| ConfigError::UnknownSensorType(decl.kind.clone()))?;
            let selected = |name: &str| {
                pattern_match(name, &decl.include) && !pattern_match(name, &decl.exclude)
            };

            let mut sensors = Vec::new();
            if kind.is_muscle() {
                for a in 0..anatomy.actuator_count() {
                    let name = anatomy.actuator_name(a);
                    if selected(name) {
                        sensors.push((name, anatomy.side(a), SensorRef::muscle(kind, a)));
                    }
                }
            } else {
                for d in 0..anatomy.dof_count() {
                    let name = anatomy.dof_name(d);
                    if selected(name) {
                        sensors.push((name, anatomy.dof_side(d), SensorRef::dof(kind, d)));
                    }
                }
            }
            if sensors.is_empty() {
                warn!("sensor declaration {} `{}` matches nothing", decl.kind, decl.include);
            }

            for (name, side, sensor) in sensors {
                let delay = config.delay_for(name_without_side(name), decl.delay);
                let node = Node::new(
                    name,
                    side,
                    kind.tag(),
                    NodeKind::Sensor { sensor, delay },
                    Activation::Linear,
                );
                self.net.add_node(layer, node);
            }
        }
        Ok(())
    }

    fn pattern_layer(&mut self, decl: &PatternLayerDecl) -> Result<()> {
        let layer = self.net.add_layer(PATTERN_LAYER, LayerKind::Pattern)?;
        let params = self.resolver.params();
        let period = params.get_or_create("CPG.period", decl.period.as_ref(), 1.0)?;
        let sigma = params.get_or_create("CPG.sigma", decl.sigma.as_ref(), 0.5)?;
        if period <= 0.0 || sigma <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: PATTERN_LAYER.to_string(),
                reason: format!("period {} and sigma {} must be positive", period, sigma),
            });
        }

        let count = decl.count.max(1);
        for &side in decl.locality.sides() {
            for k in 0..decl.count {
                let spread = k as f64 * period / count as f64;
                let mut t0 = params.get_or_create(&format!("CPG{}.t0", k), decl.t0.as_ref(), spread)?;
                // The right side runs half a cycle behind.
                if side == Side::Right {
                    t0 += 0.5 * period;
                }
                let node = Node::new(
                    format!("CPG{}{}", k, side.suffix()),
                    side,
                    PATTERN_LAYER,
                    NodeKind::Pattern(Pulse { t0, sigma, period }),
                    decl.activation,
                );
                self.net.add_node(layer, node);
            }
        }
        Ok(())
    }

    fn inter_layer(&mut self, decl: &InterLayerDecl) -> Result<()> {
        let anatomy = self.anatomy;
        let name = fix_layer_name(&decl.name);
        let layer = self.net.add_layer(&name, LayerKind::Inter)?;
        let mut next_id = 0;

        for group in &decl.nodes {
            let activation = group.activation.unwrap_or(self.config.activation);
            let mut nodes = Vec::new();
            match &group.actuators {
                Some(pattern) => {
                    for a in 0..anatomy.actuator_count() {
                        let actuator = anatomy.actuator_name(a);
                        let side = anatomy.side(a);
                        if pattern_match(actuator, pattern) && group.locality.admits(side) {
                            let node = Node::new(actuator, side, name.as_str(), NodeKind::Inter, activation)
                                .with_actuator(a);
                            let offset_name = format!("{}.{}.C0", node.par_name(), name);
                            nodes.push((node, offset_name));
                        }
                    }
                    if nodes.is_empty() {
                        warn!("layer {}: actuator pattern `{}` matches nothing", name, pattern);
                    }
                }
                None => {
                    for &side in group.locality.sides() {
                        for i in 0..group.count {
                            let id = format!("{}_{}", name, next_id + i);
                            let node = Node::new(
                                format!("{}{}", id, side.suffix()),
                                side,
                                name.as_str(),
                                NodeKind::Inter,
                                activation,
                            );
                            nodes.push((node, format!("{}.C0", id)));
                        }
                    }
                    next_id += group.count;
                }
            }

            for (node, offset_name) in nodes {
                let offset = self
                    .resolver
                    .params()
                    .get_or_create(&offset_name, group.offset.as_ref(), 0.0)?;
                let h = self.net.add_node(layer, node.with_offset(offset));
                self.connect(h, &group.inputs)?;
            }
        }
        Ok(())
    }

    fn motor_layer(&mut self) -> Result<Vec<(NodeHandle, ActuatorId)>> {
        let (config, anatomy) = (self.config, self.anatomy);
        let layer = self.net.add_layer(MOTOR_LAYER, LayerKind::Motor)?;
        let decl = &config.motor;
        let activation = decl.activation.unwrap_or(config.activation);

        let mut motors = Vec::with_capacity(anatomy.actuator_count());
        for a in 0..anatomy.actuator_count() {
            let name = anatomy.actuator_name(a);
            let mut offset = 0.0;
            for vm in self
                .resolver
                .contributions(Some(a), name_without_side(name), Role::Target)
            {
                let c0 = self.resolver.params().get_or_create(
                    &format!("{}.C0", vm.name),
                    decl.offset.as_ref(),
                    0.0,
                )?;
                offset += vm.correlation * c0;
            }

            let node = Node::new(
                name,
                anatomy.side(a),
                MOTOR_LAYER,
                NodeKind::Motor { actuator: a },
                activation,
            )
            .with_offset(offset);
            let h = self.net.add_node(layer, node);
            self.connect(h, &decl.inputs)?;
            motors.push((h, a));
        }
        Ok(motors)
    }

    /// Resolves and adds the inputs of a freshly added node.
    ///
    /// Within its own layer a node only sees the nodes added before it.
    fn connect(&mut self, h: NodeHandle, inputs: &[ConnectionDecl]) -> Result<()> {
        for decl in inputs {
            let rule = decl.rule()?;
            if rule.kind == ConnectionKind::None {
                continue;
            }
            let source = self
                .net
                .layer_index(&rule.input_layer)
                .ok_or_else(|| ConfigError::UnknownLayer(rule.input_layer.clone()))?;
            let nodes = self.net.layer(source).nodes();
            let candidates = if source == h.layer {
                &nodes[..h.index]
            } else {
                nodes
            };

            let decls = ConnectionParams {
                gain: decl.gain.as_ref(),
                offset: decl.offset.as_ref(),
            };
            let target = self.net.node(h);
            let resolved =
                self.resolver
                    .resolve(&Target::of(target), &rule, source, candidates, decls)?;
            if resolved.is_empty() {
                warn!(
                    "{}: {} connection from layer {} admits no sources",
                    target.name,
                    rule.kind.name(),
                    rule.input_layer
                );
            }

            for r in resolved {
                self.net.add_input(h, Input::new(r.source, r.gain, r.offset))?;
            }
        }
        Ok(())
    }
}

impl NeuralController {
    pub fn new<A: Anatomy + ?Sized>(
        config: &NeuralConfig,
        anatomy: &A,
        params: &mut ParamSet,
    ) -> Result<Self> {
        // Decompositions are memoized for this instance only.
        let mut correlations = CorrelationCache::new(config.parameter_mode);
        let mut b = Builder {
            config,
            anatomy,
            net: NeuralNetwork::new(),
            resolver: ConnectionResolver::new(
                anatomy,
                &mut correlations,
                params,
                config.synergy_policy,
            ),
        };

        b.sensor_layer()?;
        if let Some(patterns) = &config.patterns {
            b.pattern_layer(patterns)?;
        }
        for layer in &config.layers {
            b.inter_layer(layer)?;
        }
        let motors = b.motor_layer()?;

        let Builder { net, mut resolver, .. } = b;
        debug!(
            "neural controller: {} layers, {} nodes, {} edges, {} parameters",
            net.layers().len(),
            net.node_count(),
            net.edge_count(),
            resolver.params().len()
        );
        drop(resolver);
        debug!("neural controller: {} memoized decompositions", correlations.len());

        Ok(Self {
            outputs: vec![0.0; motors.len()],
            network: net,
            motors,
            mode: config.parameter_mode,
        })
    }

    /// Evaluates every motor node for a new step and adds its output to the actuator.
    pub fn update<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        self.network.advance();
        for (i, &(h, _)) in self.motors.iter().enumerate() {
            self.outputs[i] = self.network.evaluate(&*sim, h);
        }
        for (&(_, actuator), &u) in self.motors.iter().zip(&self.outputs) {
            sim.add_actuator_input(actuator, u);
        }
    }

    pub fn network(&self) -> &NeuralNetwork {
        &self.network
    }

    pub fn motors(&self) -> &[(NodeHandle, ActuatorId)] {
        &self.motors
    }

    /// Motor outputs of the most recent step, in actuator order.
    pub fn outputs(&self) -> &[f64] {
        &self.outputs
    }

    /// (channel, delay) pairs the delayed-sensor buffer must record.
    pub fn required_sensors(&self) -> Vec<(SensorRef, f64)> {
        let Some(layer) = self.network.layer_index(SENSOR_LAYER) else {
            return Vec::new();
        };
        self.network
            .layer(layer)
            .nodes()
            .iter()
            .filter_map(|n| match n.kind {
                NodeKind::Sensor { sensor, delay } => Some((sensor, delay)),
                _ => None,
            })
            .collect()
    }

    /// e.g. `N.V.34.4.8.14`: mode, then node counts of every layer.
    pub fn signature(&self) -> String {
        let mode = match self.mode {
            ParameterMode::Muscle => "M",
            ParameterMode::Dof => "D",
            ParameterMode::Virtual => "V",
            ParameterMode::VirtualDof => "VD",
        };
        let sizes: Vec<String> = self
            .network
            .layers()
            .iter()
            .map(|l| l.len().to_string())
            .collect();
        format!("N.{}.{}", mode, sizes.join("."))
    }
}
