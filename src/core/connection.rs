//! Resolution of declarative connection rules into weighted graph inputs.

use serde::{Deserialize, Serialize};

use crate::correlation::{CorrelationCache, Role, VirtualMuscle};
use crate::error::{ConfigError, Result};
use crate::model::{name_without_side, pattern_match, ActuatorId, Anatomy, Side};
use crate::network::{Node, NodeHandle};
use crate::params::{ParamDecl, ParamKind, ParamSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    None,
    Bilateral,
    Monosynaptic,
    Antagonistic,
    Agonistic,
    Synergetic,
    Ipsilateral,
    Contralateral,
    /// Admits only the source named in the rule.
    Source,
}

// Shared read-only by every controller instance.
const CONNECTION_KINDS: [(&str, ConnectionKind); 10] = [
    ("none", ConnectionKind::None),
    ("bilateral", ConnectionKind::Bilateral),
    ("monosynaptic", ConnectionKind::Monosynaptic),
    ("antagonistic", ConnectionKind::Antagonistic),
    ("agonistic", ConnectionKind::Agonistic),
    ("synergetic", ConnectionKind::Synergetic),
    ("ipsilateral", ConnectionKind::Ipsilateral),
    ("contralateral", ConnectionKind::Contralateral),
    ("source", ConnectionKind::Source),
    // Older configurations.
    ("protagonistic", ConnectionKind::Agonistic),
];

impl ConnectionKind {
    pub fn parse(name: &str) -> Result<ConnectionKind> {
        CONNECTION_KINDS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, k)| *k)
            .ok_or_else(|| ConfigError::UnknownConnection(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        CONNECTION_KINDS
            .iter()
            .find(|(_, k)| *k == self)
            .map(|(n, _)| *n)
            .unwrap_or("none")
    }
}

/// When two actuators count as synergists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynergyPolicy {
    /// Any shared joint, regardless of direction.
    #[default]
    AnySharedJoint,
    /// A shared joint actuated in the same direction.
    SharedJointAgonist,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRule {
    pub kind: ConnectionKind,
    /// Glob over the candidates' type tags.
    pub type_pattern: String,
    pub input_layer: String,
    /// Side-less name required by [`ConnectionKind::Source`].
    pub source_name: Option<String>,
}

impl ConnectionRule {
    pub fn new(kind: ConnectionKind, input_layer: &str) -> Self {
        Self {
            kind,
            type_pattern: "*".to_string(),
            input_layer: input_layer.to_string(),
            source_name: None,
        }
    }

    pub fn with_type(mut self, pattern: &str) -> Self {
        self.type_pattern = pattern.to_string();
        self
    }

    pub fn with_source(mut self, name: &str) -> Self {
        self.source_name = Some(name.to_string());
        self
    }
}

/// Declarations the bound gain and offset parameters are created from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionParams<'a> {
    pub gain: Option<&'a ParamDecl>,
    pub offset: Option<&'a ParamDecl>,
}

impl<'a> ConnectionParams<'a> {
    fn decl(&self, kind: ParamKind) -> Option<&'a ParamDecl> {
        match kind {
            ParamKind::Gain => self.gain,
            ParamKind::Offset => self.offset,
        }
    }
}

/// The node receiving a connection, as seen by the resolver.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub index: usize,
    pub side: Side,
    pub actuator: Option<ActuatorId>,
    pub par_name: &'a str,
}

impl<'a> Target<'a> {
    pub fn of(node: &'a Node) -> Self {
        Self {
            index: node.index(),
            side: node.side,
            actuator: node.actuator,
            par_name: node.par_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    pub source: NodeHandle,
    pub gain: f64,
    pub offset: f64,
    /// Gain parameter names the net gain was assembled from.
    pub parameters: Vec<String>,
}

/// Joins target and source contribution names into a parameter name.
pub fn pair_name(target: &str, source: &str, type_tag: &str) -> String {
    if target == source {
        format!("{}.{}", target, type_tag)
    } else {
        format!("{}.{}.{}", target, source, type_tag)
    }
}

pub struct ConnectionResolver<'a, A: Anatomy + ?Sized> {
    anatomy: &'a A,
    correlations: &'a mut CorrelationCache,
    params: &'a mut ParamSet,
    policy: SynergyPolicy,
}

impl<'a, A: Anatomy + ?Sized> ConnectionResolver<'a, A> {
    pub fn new(
        anatomy: &'a A,
        correlations: &'a mut CorrelationCache,
        params: &'a mut ParamSet,
        policy: SynergyPolicy,
    ) -> Self {
        Self {
            anatomy,
            correlations,
            params,
            policy,
        }
    }

    pub fn anatomy(&self) -> &'a A {
        self.anatomy
    }

    pub fn params(&mut self) -> &mut ParamSet {
        &mut *self.params
    }

    /// Whether `rule` lets `candidate` feed `target`.
    pub fn admits(&self, target: &Target, rule: &ConnectionRule, candidate: &Node) -> bool {
        let pair = target.actuator.zip(candidate.actuator);
        match rule.kind {
            ConnectionKind::None => false,
            ConnectionKind::Bilateral => true,
            // Indices only line up when neither end stands for an actuator.
            ConnectionKind::Monosynaptic => match (target.actuator, candidate.actuator) {
                (Some(t), Some(c)) => t == c,
                (None, None) => candidate.index() == target.index,
                _ => false,
            },
            ConnectionKind::Antagonistic => {
                pair.is_some_and(|(t, c)| self.anatomy.is_antagonist(t, c))
            }
            ConnectionKind::Agonistic => pair.is_some_and(|(t, c)| self.anatomy.is_agonist(t, c)),
            ConnectionKind::Synergetic => pair.is_some_and(|(t, c)| match self.policy {
                SynergyPolicy::AnySharedJoint => self.anatomy.shares_joint(t, c),
                SynergyPolicy::SharedJointAgonist => {
                    self.anatomy.shares_joint(t, c) && self.anatomy.is_agonist(t, c)
                }
            }),
            ConnectionKind::Ipsilateral => {
                candidate.side == target.side || candidate.side == Side::None
            }
            ConnectionKind::Contralateral => {
                candidate.side != target.side || candidate.side == Side::None
            }
            ConnectionKind::Source => rule
                .source_name
                .as_deref()
                .is_some_and(|name| name_without_side(&candidate.name) == name),
        }
    }

    /// Contributions used to name parameters on one end of a connection.
    ///
    /// Nodes that are not actuators, and actuators that cannot be decomposed,
    /// stand for themselves.
    pub fn contributions(
        &mut self,
        actuator: Option<ActuatorId>,
        par_name: &str,
        role: Role,
    ) -> Vec<VirtualMuscle> {
        let list = match actuator {
            Some(a) => self.correlations.decompose(self.anatomy, a, role),
            None => Vec::new(),
        };
        if list.is_empty() {
            vec![VirtualMuscle::named(par_name)]
        } else {
            list
        }
    }

    /// Binds `name` (with the kind's marker) through the parameter set.
    pub fn bind(
        &mut self,
        name: &str,
        kind: ParamKind,
        decls: ConnectionParams,
        default: f64,
    ) -> Result<f64> {
        let full = format!("{}{}", name, kind.suffix());
        self.params.get_or_create(&full, decls.decl(kind), default)
    }

    /// Admitted sources among `candidates` (all in layer `layer`), each with a
    /// net gain and offset assembled from correlation-weighted shared parameters.
    pub fn resolve(
        &mut self,
        target: &Target,
        rule: &ConnectionRule,
        layer: usize,
        candidates: &[Node],
        decls: ConnectionParams,
    ) -> Result<Vec<ResolvedInput>> {
        let mut out = Vec::new();
        if rule.kind == ConnectionKind::None {
            return Ok(out);
        }
        let targets = self.contributions(target.actuator, target.par_name, Role::Target);

        for candidate in candidates {
            if !pattern_match(&candidate.type_tag, &rule.type_pattern)
                || !self.admits(target, rule, candidate)
            {
                continue;
            }

            let sources =
                self.contributions(candidate.actuator, candidate.par_name(), Role::Source);
            let default_gain = if candidate.actuator.is_some() { 0.0 } else { 1.0 };

            let mut gain = 0.0;
            let mut offset = 0.0;
            let mut parameters = Vec::new();
            for tp in &targets {
                for sp in &sources {
                    if tp.crosses_axes(sp) {
                        continue;
                    }
                    let name = pair_name(&tp.name, &sp.name, &candidate.type_tag);
                    let factor = tp.correlation * sp.correlation;
                    gain += factor * self.bind(&name, ParamKind::Gain, decls, default_gain)?;
                    offset += factor * self.bind(&name, ParamKind::Offset, decls, 0.0)?;
                    parameters.push(name);
                }
            }

            out.push(ResolvedInput {
                source: NodeHandle {
                    layer,
                    index: candidate.index(),
                },
                gain,
                offset,
                parameters,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::correlation::ParameterMode;
    use crate::model::{SensorKind, SensorRef};
    use crate::network::{LayerKind, NeuralNetwork, NodeKind};
    use crate::testbed::Testbed;

    fn inter(name: &str) -> Node {
        Node::new(
            name,
            Side::from_name(name),
            "N1",
            NodeKind::Inter,
            Activation::Rectifier,
        )
    }

    fn inter_layer(names: &[&str]) -> NeuralNetwork {
        let mut net = NeuralNetwork::new();
        let l = net.add_layer("N1", LayerKind::Inter).unwrap();
        for n in names {
            net.add_node(l, inter(n));
        }
        net
    }

    fn admitted(
        body: &Testbed,
        target: &Node,
        rule: &ConnectionRule,
        net: &NeuralNetwork,
    ) -> Vec<usize> {
        let mut cache = CorrelationCache::new(ParameterMode::Virtual);
        let mut par = ParamSet::new(1);
        let mut res = ConnectionResolver::new(body, &mut cache, &mut par, SynergyPolicy::default());
        res.resolve(
            &Target::of(target),
            rule,
            0,
            net.layer(0).nodes(),
            ConnectionParams::default(),
        )
        .unwrap()
        .into_iter()
        .map(|r| r.source.index)
        .collect()
    }

    #[test]
    fn kind_table() {
        assert_eq!(ConnectionKind::parse("protagonistic").unwrap(), ConnectionKind::Agonistic);
        assert_eq!(ConnectionKind::Contralateral.name(), "contralateral");
        assert!(matches!(
            ConnectionKind::parse("diagonal"),
            Err(ConfigError::UnknownConnection(_))
        ));
    }

    #[test]
    fn ipsilateral_and_contralateral_partition_bilateral() {
        let body = Testbed::new();
        let net = inter_layer(&["N1_0_l", "N1_0_r", "N1_1", "N1_2_l", "N1_2_r", "N1_3"]);
        for side in [Side::Left, Side::Right, Side::None] {
            let target = inter(&format!("N2_0{}", side.suffix()));
            let all = admitted(&body, &target, &ConnectionRule::new(ConnectionKind::Bilateral, "N1"), &net);
            let ipsi = admitted(&body, &target, &ConnectionRule::new(ConnectionKind::Ipsilateral, "N1"), &net);
            let contra = admitted(&body, &target, &ConnectionRule::new(ConnectionKind::Contralateral, "N1"), &net);

            let mut union: Vec<usize> = ipsi.iter().chain(&contra).copied().collect();
            union.sort_unstable();
            union.dedup();
            assert_eq!(union, all);

            let both: Vec<usize> = ipsi.iter().filter(|i| contra.contains(i)).copied().collect();
            assert_eq!(both, vec![2, 5], "side {:?}", side);
        }
    }

    #[test]
    fn monosynaptic_matches_index() {
        let body = Testbed::new();
        let net = inter_layer(&["a", "b", "c", "d"]);
        let rule = ConnectionRule::new(ConnectionKind::Monosynaptic, "N1");
        let mut target = net.layer(0).nodes()[2].clone();
        assert_eq!(admitted(&body, &target, &rule, &net), vec![2]);

        let mut other = NeuralNetwork::new();
        let l = other.add_layer("N2", LayerKind::Inter).unwrap();
        for i in 0..6 {
            other.add_node(l, inter(&format!("x{i}")));
        }
        target = other.layer(0).nodes()[5].clone();
        assert!(admitted(&body, &target, &rule, &net).is_empty());
    }

    #[test]
    fn source_by_name_strips_side() {
        let body = Testbed::new();
        let net = inter_layer(&["N1_0_l", "N1_0_r", "N1_1_l"]);
        let rule = ConnectionRule::new(ConnectionKind::Source, "N1").with_source("N1_0");
        assert_eq!(admitted(&body, &inter("x"), &rule, &net), vec![0, 1]);
        assert!(admitted(&body, &inter("x"), &ConnectionRule::new(ConnectionKind::None, "N1"), &net).is_empty());
    }

    fn sensor_layer(body: &Testbed, names: &[&str], kind: SensorKind) -> NeuralNetwork {
        let mut net = NeuralNetwork::new();
        let l = net.add_layer("0", LayerKind::Sensor).unwrap();
        for n in names {
            let a = body.find_actuator(n).unwrap();
            let sensor = SensorRef::muscle(kind, a);
            net.add_node(
                l,
                Node::new(
                    *n,
                    Side::from_name(n),
                    kind.tag(),
                    NodeKind::Sensor { sensor, delay: 0.0 },
                    Activation::Linear,
                ),
            );
        }
        net
    }

    fn motor(body: &Testbed, name: &str) -> Node {
        let a = body.find_actuator(name).unwrap();
        Node::new(
            name,
            Side::from_name(name),
            "M",
            NodeKind::Motor { actuator: a },
            Activation::Rectifier,
        )
    }

    #[test]
    fn anatomical_relations_filter_sources() {
        let body = Testbed::new();
        let names = ["soleus_r", "tib_ant_r", "gastroc_r", "vasti_r", "soleus_l"];
        let net = sensor_layer(&body, &names, SensorKind::Force);
        let target = motor(&body, "soleus_r");

        let anta = admitted(&body, &target, &ConnectionRule::new(ConnectionKind::Antagonistic, "0"), &net);
        assert_eq!(anta, vec![1]);
        let ago = admitted(&body, &target, &ConnectionRule::new(ConnectionKind::Agonistic, "0"), &net);
        assert_eq!(ago, vec![0, 2]);
        let syn = admitted(&body, &target, &ConnectionRule::new(ConnectionKind::Synergetic, "0"), &net);
        assert_eq!(syn, vec![0, 1, 2]);
        let mono = admitted(&body, &target, &ConnectionRule::new(ConnectionKind::Monosynaptic, "0"), &net);
        assert_eq!(mono, vec![0]);
        let typed = admitted(
            &body,
            &target,
            &ConnectionRule::new(ConnectionKind::Bilateral, "0").with_type("L"),
            &net,
        );
        assert!(typed.is_empty());
    }

    #[test]
    fn monosynaptic_skips_joint_sensors() {
        let body = Testbed::new();
        let mut net = NeuralNetwork::new();
        let l = net.add_layer("0", LayerKind::Sensor).unwrap();
        for d in 0..body.dof_count() {
            let sensor = SensorRef::dof(SensorKind::DofPosition, d);
            let name = body.dof_name(d);
            net.add_node(
                l,
                Node::new(
                    name,
                    Side::from_name(name),
                    "DP",
                    NodeKind::Sensor { sensor, delay: 0.0 },
                    Activation::Linear,
                ),
            );
        }
        let soleus = body.find_actuator("soleus_r").unwrap();
        let sensor = SensorRef::muscle(SensorKind::Force, soleus);
        net.add_node(
            l,
            Node::new(
                "soleus_r",
                Side::Right,
                "F",
                NodeKind::Sensor { sensor, delay: 0.0 },
                Activation::Linear,
            ),
        );

        let rule = ConnectionRule::new(ConnectionKind::Monosynaptic, "0");
        let dofs = body.dof_count();
        assert_eq!(admitted(&body, &motor(&body, "soleus_r"), &rule, &net), vec![dofs]);
        // Shares index 0 with the pelvis_tilt sensor but has no force sensor.
        let glut = motor(&body, "glut_max_l");
        assert_eq!(glut.index(), net.layer(0).nodes()[0].index());
        assert!(admitted(&body, &glut, &rule, &net).is_empty());
    }

    #[test]
    fn rules_sharing_a_name_share_its_value() {
        let body = Testbed::new();
        let net = sensor_layer(&body, &["soleus_r", "tib_ant_r"], SensorKind::Force);
        let target = motor(&body, "soleus_r");
        let gain = ParamDecl::gauss(1.0, 0.1);

        let mut cache = CorrelationCache::new(ParameterMode::Virtual);
        let mut par = ParamSet::new(4);
        let mut res = ConnectionResolver::new(&body, &mut cache, &mut par, SynergyPolicy::default());
        let anta = res
            .resolve(
                &Target::of(&target),
                &ConnectionRule::new(ConnectionKind::Antagonistic, "0"),
                0,
                net.layer(0).nodes(),
                ConnectionParams::default(),
            )
            .unwrap();
        let all = res
            .resolve(
                &Target::of(&target),
                &ConnectionRule::new(ConnectionKind::Bilateral, "0"),
                0,
                net.layer(0).nodes(),
                ConnectionParams {
                    gain: Some(&gain),
                    offset: None,
                },
            )
            .unwrap();

        assert_eq!(anta.len(), 1);
        assert_eq!(all.len(), 2);
        assert_eq!(anta[0].parameters, all[1].parameters);
        // First bound without a declaration, so the later declaration is ignored.
        assert_eq!(all[1].gain, anta[0].gain);
        assert_eq!(all[1].gain, 0.0);
        assert_ne!(all[0].gain, 0.0);
        assert_eq!(par.len(), 1);
    }

    #[test]
    fn synergy_policy_is_configurable() {
        let body = Testbed::new();
        let net = sensor_layer(&body, &["tib_ant_r", "gastroc_r"], SensorKind::Force);
        let target = motor(&body, "soleus_r");
        let rule = ConnectionRule::new(ConnectionKind::Synergetic, "0");
        let mut cache = CorrelationCache::new(ParameterMode::Virtual);
        let mut par = ParamSet::new(1);
        let mut res = ConnectionResolver::new(
            &body,
            &mut cache,
            &mut par,
            SynergyPolicy::SharedJointAgonist,
        );
        let got = res
            .resolve(&Target::of(&target), &rule, 0, net.layer(0).nodes(), ConnectionParams::default())
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].source.index, 1);
    }

    #[test]
    fn mirrored_connections_share_parameters() {
        let body = Testbed::new();
        let net = sensor_layer(&body, &["gastroc_l", "gastroc_r"], SensorKind::Length);
        let gain = ParamDecl::gauss(0.3, 0.1);
        let offset = ParamDecl::gauss(0.0, 0.05);
        let decls = ConnectionParams {
            gain: Some(&gain),
            offset: Some(&offset),
        };
        let rule = ConnectionRule::new(ConnectionKind::Monosynaptic, "0");

        let mut cache = CorrelationCache::new(ParameterMode::Virtual);
        let mut par = ParamSet::new(5);
        let mut res = ConnectionResolver::new(&body, &mut cache, &mut par, SynergyPolicy::default());
        let left = motor(&body, "gastroc_l");
        let right = motor(&body, "gastroc_r");
        let l = res
            .resolve(&Target::of(&left), &rule, 0, net.layer(0).nodes(), decls)
            .unwrap();
        let r = res
            .resolve(&Target::of(&right), &rule, 0, net.layer(0).nodes(), decls)
            .unwrap();

        assert_eq!(l.len(), 1);
        assert_eq!(r.len(), 1);
        assert_eq!(l[0].parameters, r[0].parameters);
        assert_eq!(l[0].parameters, vec!["knee_angle-ankle_angle-.L".to_string()]);
        assert_eq!(l[0].gain, r[0].gain);
        assert_eq!(l[0].offset, r[0].offset);
        assert_eq!(par.len(), 2);
        assert!(par.get("knee_angle-ankle_angle-.L0").is_some());
    }

    #[test]
    fn net_gain_sums_weighted_pairs() {
        let body = Testbed::new();
        let net = sensor_layer(&body, &["glut_max_r"], SensorKind::Force);
        let rule = ConnectionRule::new(ConnectionKind::Bilateral, "0");
        let gain = ParamDecl::Fixed(1.0);
        let decls = ConnectionParams {
            gain: Some(&gain),
            offset: None,
        };
        let mut cache = CorrelationCache::new(ParameterMode::Virtual);
        let mut par = ParamSet::new(1);
        let mut res = ConnectionResolver::new(&body, &mut cache, &mut par, SynergyPolicy::default());
        let target = motor(&body, "glut_max_r");
        let got = res
            .resolve(&Target::of(&target), &rule, 0, net.layer(0).nodes(), decls)
            .unwrap();

        // Two axes on one joint: only same-axis pairs survive, weighted by w^2.
        assert_eq!(got[0].parameters.len(), 2);
        assert!((got[0].gain - 1.0).abs() < 1e-12);
        assert_eq!(got[0].offset, 0.0);
    }

    #[test]
    fn pair_names_collapse() {
        assert_eq!(pair_name("soleus", "soleus", "F"), "soleus.F");
        assert_eq!(pair_name("soleus", "gastroc", "F"), "soleus.gastroc.F");
    }
}
