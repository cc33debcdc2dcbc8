//! Declarative controller configuration, loaded from JSON.
//!
//! Names that refer to actuators or degrees of freedom are written without a
//! side suffix wherever a [`Locality`] maps them onto the body.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::connection::{ConnectionKind, ConnectionRule, SynergyPolicy};
use crate::correlation::ParameterMode;
use crate::error::Result;
use crate::model::Side;
use crate::params::ParamDecl;
use crate::reflex::Range;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerConfig {
    Neural(NeuralConfig),
    Reflex(ReflexConfig),
}

impl ControllerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Numeric layer names greater than zero refer to interneuron layers `N<n>`.
pub fn fix_layer_name(name: &str) -> String {
    match name.trim().parse::<i64>() {
        Ok(n) if n > 0 => format!("N{}", n),
        _ => name.trim().to_string(),
    }
}

/// Which body sides a declaration applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    /// Names are used as written.
    None,
    Left,
    Right,
    #[default]
    Both,
}

impl Locality {
    pub fn sides(self) -> &'static [Side] {
        match self {
            Locality::None => &[Side::None],
            Locality::Left => &[Side::Left],
            Locality::Right => &[Side::Right],
            Locality::Both => &[Side::Left, Side::Right],
        }
    }

    /// Whether something on `side` falls inside this locality.
    pub fn admits(self, side: Side) -> bool {
        match self {
            Locality::None | Locality::Both => true,
            Locality::Left => side != Side::Right,
            Locality::Right => side != Side::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralConfig {
    pub activation: Activation,
    pub parameter_mode: ParameterMode,
    pub synergy_policy: SynergyPolicy,

    // Per-source delays in seconds, keyed by side-less name.
    pub delays: BTreeMap<String, f64>,
    pub delay_factor: f64,

    pub sensors: Vec<SensorDecl>,
    pub patterns: Option<PatternLayerDecl>,
    pub layers: Vec<InterLayerDecl>,
    pub motor: MotorLayerDecl,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            activation: Activation::Rectifier,
            parameter_mode: ParameterMode::Virtual,
            synergy_policy: SynergyPolicy::AnySharedJoint,
            delays: BTreeMap::new(),
            delay_factor: 1.0,
            sensors: Vec::new(),
            patterns: None,
            layers: Vec::new(),
            motor: MotorLayerDecl::default(),
        }
    }
}

impl NeuralConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter_mode(mut self, mode: ParameterMode) -> Self {
        self.parameter_mode = mode;
        self
    }

    pub fn with_delay(mut self, name: &str, delay: f64) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub fn with_sensor(mut self, sensor: SensorDecl) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn with_patterns(mut self, patterns: PatternLayerDecl) -> Self {
        self.patterns = Some(patterns);
        self
    }

    pub fn with_layer(mut self, layer: InterLayerDecl) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_motor_input(mut self, input: ConnectionDecl) -> Self {
        self.motor.inputs.push(input);
        self
    }

    /// Delay of the sensor on `name`: the `delays` table scaled by
    /// `delay_factor`, else the declaration's own delay.
    pub fn delay_for(&self, name: &str, fallback: Option<f64>) -> f64 {
        match self.delays.get(name) {
            Some(d) => d * self.delay_factor,
            None => fallback.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDecl {
    /// Channel tag: `F`, `L`, `V`, `S`, `DP` or `DV`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "match_all")]
    pub include: String,
    #[serde(default)]
    pub exclude: String,
    #[serde(default)]
    pub delay: Option<f64>,
}

fn match_all() -> String {
    "*".to_string()
}

impl SensorDecl {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            include: match_all(),
            exclude: String::new(),
            delay: None,
        }
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.include = pattern.to_string();
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.exclude = pattern.to_string();
        self
    }
}

/// Time-driven pulse generators, one set per side of the locality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternLayerDecl {
    pub count: usize,
    pub locality: Locality,
    pub activation: Activation,
    // Per-node peak time; defaults to an even spread over the period.
    pub t0: Option<ParamDecl>,
    pub sigma: Option<ParamDecl>,
    pub period: Option<ParamDecl>,
}

impl Default for PatternLayerDecl {
    fn default() -> Self {
        Self {
            count: 1,
            locality: Locality::Both,
            activation: Activation::Linear,
            t0: None,
            sigma: None,
            period: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterLayerDecl {
    /// `1`, `2`, ... become `N1`, `N2`, ...
    pub name: String,
    pub nodes: Vec<InterNodeDecl>,
}

impl InterLayerDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
        }
    }

    pub fn with_nodes(mut self, nodes: InterNodeDecl) -> Self {
        self.nodes.push(nodes);
        self
    }
}

/// A group of interneurons sharing one set of connection rules.
///
/// With `actuators` set, one node is created per matching actuator and the
/// node stands for it in anatomical relations. Otherwise `count` nodes are
/// created for each side of the locality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterNodeDecl {
    pub count: usize,
    pub actuators: Option<String>,
    pub locality: Locality,
    pub activation: Option<Activation>,
    pub offset: Option<ParamDecl>,
    pub inputs: Vec<ConnectionDecl>,
}

impl Default for InterNodeDecl {
    fn default() -> Self {
        Self {
            count: 1,
            actuators: None,
            locality: Locality::Both,
            activation: None,
            offset: None,
            inputs: Vec::new(),
        }
    }
}

impl InterNodeDecl {
    pub fn count(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    pub fn per_actuator(pattern: &str) -> Self {
        Self {
            actuators: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    pub fn with_offset(mut self, offset: ParamDecl) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_input(mut self, input: ConnectionDecl) -> Self {
        self.inputs.push(input);
        self
    }
}

/// One motor node per actuator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorLayerDecl {
    pub activation: Option<Activation>,
    pub offset: Option<ParamDecl>,
    pub inputs: Vec<ConnectionDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionDecl {
    pub connect: Option<String>,
    #[serde(rename = "type")]
    pub type_pattern: Option<String>,
    pub input_layer: Option<String>,
    pub source: Option<String>,
    pub gain: Option<ParamDecl>,
    pub offset: Option<ParamDecl>,
}

impl ConnectionDecl {
    pub fn new(connect: &str, input_layer: &str) -> Self {
        Self {
            connect: Some(connect.to_string()),
            input_layer: Some(input_layer.to_string()),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, pattern: &str) -> Self {
        self.type_pattern = Some(pattern.to_string());
        self
    }

    pub fn with_source(mut self, name: &str) -> Self {
        self.source = Some(name.to_string());
        self
    }

    pub fn with_gain(mut self, gain: ParamDecl) -> Self {
        self.gain = Some(gain);
        self
    }

    pub fn with_offset(mut self, offset: ParamDecl) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Connects to the named source if one is given, otherwise to nothing;
    /// reads from the sensor layer unless told otherwise.
    pub fn rule(&self) -> Result<ConnectionRule> {
        let kind = match (&self.connect, &self.source) {
            (Some(name), _) => ConnectionKind::parse(name)?,
            (None, Some(_)) => ConnectionKind::Source,
            (None, None) => ConnectionKind::None,
        };
        let layer = self.input_layer.as_deref().unwrap_or("0");
        let mut rule = ConnectionRule::new(kind, &fix_layer_name(layer));
        if let Some(pattern) = &self.type_pattern {
            rule = rule.with_type(pattern);
        }
        if let Some(source) = &self.source {
            rule = rule.with_source(source);
        }
        Ok(rule)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflexConfig {
    pub locality: Locality,
    pub reflexes: Vec<ReflexDecl>,
}

impl ReflexConfig {
    pub fn new(locality: Locality) -> Self {
        Self {
            locality,
            reflexes: Vec::new(),
        }
    }

    pub fn with_reflex(mut self, reflex: ReflexDecl) -> Self {
        self.reflexes.push(reflex);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflexKind {
    /// Feedback from a muscle's force, length, velocity and spindle.
    #[default]
    Muscle,
    /// Feedback from a degree of freedom's position and velocity.
    Dof,
}

/// Companion-dof gate of a reflex; `pos_range` is in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDecl {
    pub dof: String,
    pub pos_range: Range,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflexDecl {
    pub kind: ReflexKind,
    pub target: String,
    /// Sensed muscle or dof; the target itself when absent.
    pub source: Option<String>,
    pub delay: Option<ParamDecl>,
    pub min_control_value: Option<f64>,
    pub max_control_value: Option<f64>,

    #[serde(rename = "KL")]
    pub kl: Option<ParamDecl>,
    #[serde(rename = "L0")]
    pub l0: Option<ParamDecl>,
    #[serde(rename = "KV")]
    pub kv: Option<ParamDecl>,
    #[serde(rename = "KF")]
    pub kf: Option<ParamDecl>,
    #[serde(rename = "KS")]
    pub ks: Option<ParamDecl>,
    #[serde(rename = "KP")]
    pub kp: Option<ParamDecl>,
    #[serde(rename = "P0")]
    pub p0: Option<ParamDecl>,
    #[serde(rename = "V0")]
    pub v0: Option<ParamDecl>,
    #[serde(rename = "C0")]
    pub c0: Option<ParamDecl>,

    pub condition: Option<ConditionDecl>,
}

impl ReflexDecl {
    pub fn muscle(target: &str) -> Self {
        Self {
            kind: ReflexKind::Muscle,
            target: target.to_string(),
            ..Self::default()
        }
    }

    pub fn dof(target: &str) -> Self {
        Self {
            kind: ReflexKind::Dof,
            target: target.to_string(),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_delay(mut self, delay: ParamDecl) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_clamp(mut self, min: f64, max: f64) -> Self {
        self.min_control_value = Some(min);
        self.max_control_value = Some(max);
        self
    }

    pub fn with_condition(mut self, dof: &str, pos_range: Range) -> Self {
        self.condition = Some(ConditionDecl {
            dof: dof.to_string(),
            pos_range,
        });
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    #[test]
    fn layer_names() {
        assert_eq!(fix_layer_name("0"), "0");
        assert_eq!(fix_layer_name("2"), "N2");
        assert_eq!(fix_layer_name("CPG"), "CPG");
        assert_eq!(fix_layer_name("N1"), "N1");
    }

    #[test]
    fn connection_defaults() {
        let rule = ConnectionDecl::default().with_source("N1_0").rule().unwrap();
        assert_eq!(rule.kind, ConnectionKind::Source);
        assert_eq!(rule.input_layer, "0");
        assert_eq!(rule.source_name.as_deref(), Some("N1_0"));

        let rule = ConnectionDecl::default().rule().unwrap();
        assert_eq!(rule.kind, ConnectionKind::None);

        let rule = ConnectionDecl::new("ipsilateral", "1").with_type("F;L").rule().unwrap();
        assert_eq!(rule.input_layer, "N1");
        assert_eq!(rule.type_pattern, "F;L");

        assert!(matches!(
            ConnectionDecl::new("sideways", "0").rule(),
            Err(ConfigError::UnknownConnection(_))
        ));
    }

    #[test]
    fn neural_config_from_json() {
        let json = r#"{
            "type": "neural",
            "parameter_mode": "virtual_dof",
            "delays": { "soleus": 0.02 },
            "delay_factor": 2.0,
            "sensors": [ { "type": "F", "include": "soleus*;gastroc*" } ],
            "layers": [ { "name": "1", "nodes": [ { "count": 2, "inputs": [
                { "connect": "bilateral", "gain": { "mean": 0, "std": 0.1 } } ] } ] } ],
            "motor": { "inputs": [ { "connect": "ipsilateral", "input_layer": "1", "gain": 0.5 } ] }
        }"#;
        let ControllerConfig::Neural(cfg) = ControllerConfig::from_json_str(json).unwrap() else {
            panic!("expected a neural config");
        };
        assert_eq!(cfg.parameter_mode, ParameterMode::VirtualDof);
        assert_eq!(cfg.activation, Activation::Rectifier);
        assert_eq!(cfg.delay_for("soleus", None), 0.04);
        assert_eq!(cfg.delay_for("vasti", Some(0.01)), 0.01);
        assert_eq!(cfg.sensors[0].exclude, "");
        assert_eq!(cfg.layers[0].nodes[0].count, 2);
        assert_eq!(cfg.layers[0].nodes[0].locality, Locality::Both);
        assert_eq!(cfg.motor.inputs[0].gain, Some(ParamDecl::Fixed(0.5)));
    }

    #[test]
    fn reflex_config_from_json() {
        let json = r#"{
            "type": "reflex",
            "locality": "right",
            "reflexes": [ {
                "target": "soleus",
                "delay": 0.02,
                "KF": { "mean": 1.0, "std": 0.1 },
                "max_control_value": 1.0,
                "condition": { "dof": "knee_angle", "pos_range": { "min": -5, "max": 5 } }
            } ]
        }"#;
        let ControllerConfig::Reflex(cfg) = ControllerConfig::from_json_str(json).unwrap() else {
            panic!("expected a reflex config");
        };
        let r = &cfg.reflexes[0];
        assert_eq!(cfg.locality, Locality::Right);
        assert_eq!(r.kind, ReflexKind::Muscle);
        assert_eq!(r.source_name(), "soleus");
        assert!(r.kf.is_some() && r.kl.is_none());
        assert_eq!(r.condition.as_ref().unwrap().pos_range, Range::new(-5.0, 5.0));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            ControllerConfig::from_json_str(r#"{ "type": "fuzzy" }"#),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            ControllerConfig::from_json_file("/nonexistent/spinal.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn locality_sides() {
        assert_eq!(Locality::Both.sides(), &[Side::Left, Side::Right]);
        assert!(Locality::Left.admits(Side::None));
        assert!(!Locality::Left.admits(Side::Right));
    }
}
