//! Interfaces to the simulation engine.
//!
//! The controller never owns the body model. Construction reads structure
//! through [`Anatomy`]; every control step reads delayed sensor values and
//! writes actuator inputs through [`Simulation`].

use serde::{Deserialize, Serialize};

pub type ActuatorId = usize;
pub type DofId = usize;
pub type JointId = usize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    None,
    Left,
    Right,
}

impl Side {
    pub fn suffix(self) -> &'static str {
        match self {
            Side::None => "",
            Side::Left => "_l",
            Side::Right => "_r",
        }
    }

    /// Side encoded in a `_l` / `_r` name suffix.
    pub fn from_name(name: &str) -> Side {
        if name.ends_with("_l") {
            Side::Left
        } else if name.ends_with("_r") {
            Side::Right
        } else {
            Side::None
        }
    }

    pub fn mirrored(self) -> Side {
        match self {
            Side::None => Side::None,
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Strips a trailing `_l` / `_r` so that bilateral pairs share one name.
pub fn name_without_side(name: &str) -> &str {
    name.strip_suffix("_l")
        .or_else(|| name.strip_suffix("_r"))
        .unwrap_or(name)
}

pub fn name_with_side(name: &str, side: Side) -> String {
    format!("{}{}", name, side.suffix())
}

/// Glob match supporting `*`, `?` and `;`-separated alternatives.
pub fn pattern_match(name: &str, pattern: &str) -> bool {
    pattern
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|p| glob(name.as_bytes(), p.as_bytes()))
}

fn glob(name: &[u8], pat: &[u8]) -> bool {
    let (mut n, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pat.len() && (pat[p] == b'?' || pat[p] == name[n]) {
            n += 1;
            p += 1;
        } else if p < pat.len() && pat[p] == b'*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((sp, sn)) = star {
            p = sp + 1;
            n = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == b'*' {
        p += 1;
    }
    p == pat.len()
}

/// One joint axis spanned by an actuator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisArm {
    pub joint: JointId,
    pub dof: DofId,
    /// Signed moment arm; the sign gives the direction of actuation.
    pub moment_arm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    /// Muscle force.
    Force,
    /// Normalised fibre length.
    Length,
    /// Normalised fibre velocity.
    Velocity,
    /// Spindle afferent.
    Spindle,
    DofPosition,
    DofVelocity,
}

const SENSOR_TAGS: [(&str, SensorKind); 6] = [
    ("F", SensorKind::Force),
    ("L", SensorKind::Length),
    ("V", SensorKind::Velocity),
    ("S", SensorKind::Spindle),
    ("DP", SensorKind::DofPosition),
    ("DV", SensorKind::DofVelocity),
];

impl SensorKind {
    pub fn tag(self) -> &'static str {
        SENSOR_TAGS
            .iter()
            .find(|(_, k)| *k == self)
            .map(|(t, _)| *t)
            .unwrap_or("?")
    }

    pub fn from_tag(tag: &str) -> Option<SensorKind> {
        SENSOR_TAGS.iter().find(|(t, _)| *t == tag).map(|(_, k)| *k)
    }

    pub fn is_muscle(self) -> bool {
        !matches!(self, SensorKind::DofPosition | SensorKind::DofVelocity)
    }
}

/// A sensor the delayed-sensor buffer records.
///
/// `target` is an [`ActuatorId`] for muscle kinds and a [`DofId`] otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorRef {
    pub kind: SensorKind,
    pub target: usize,
}

impl SensorRef {
    pub fn muscle(kind: SensorKind, actuator: ActuatorId) -> Self {
        debug_assert!(kind.is_muscle());
        Self {
            kind,
            target: actuator,
        }
    }

    pub fn dof(kind: SensorKind, dof: DofId) -> Self {
        debug_assert!(!kind.is_muscle());
        Self { kind, target: dof }
    }

    pub fn actuator(&self) -> Option<ActuatorId> {
        self.kind.is_muscle().then_some(self.target)
    }
}

/// Static body structure, queried only while a controller is constructed.
pub trait Anatomy {
    fn actuator_count(&self) -> usize;
    fn actuator_name(&self, actuator: ActuatorId) -> &str;

    fn dof_count(&self) -> usize;
    fn dof_name(&self, dof: DofId) -> &str;

    /// Axes spanned by an actuator, ordered proximal to distal along the chain.
    fn actuator_axes(&self, actuator: ActuatorId) -> Vec<AxisArm>;

    fn shares_joint(&self, a: ActuatorId, b: ActuatorId) -> bool;
    fn is_agonist(&self, a: ActuatorId, b: ActuatorId) -> bool;
    fn is_antagonist(&self, a: ActuatorId, b: ActuatorId) -> bool;

    fn side(&self, actuator: ActuatorId) -> Side {
        Side::from_name(self.actuator_name(actuator))
    }

    fn dof_side(&self, dof: DofId) -> Side {
        Side::from_name(self.dof_name(dof))
    }

    fn find_actuator(&self, name: &str) -> Option<ActuatorId> {
        (0..self.actuator_count()).find(|&a| self.actuator_name(a) == name)
    }

    fn find_dof(&self, name: &str) -> Option<DofId> {
        (0..self.dof_count()).find(|&d| self.dof_name(d) == name)
    }
}

/// Per-step surface of a running simulation.
pub trait Simulation {
    fn time(&self) -> f64;

    /// Sensor value `delay` seconds in the past, answered by the engine's sensor buffer.
    fn delayed_value(&self, sensor: SensorRef, delay: f64) -> f64;

    /// Adds to the actuator's input accumulator for the current step.
    fn add_actuator_input(&mut self, actuator: ActuatorId, value: f64);

    fn dof_position(&self, dof: DofId) -> f64 {
        self.delayed_value(SensorRef::dof(SensorKind::DofPosition, dof), 0.0)
    }

    fn dof_velocity(&self, dof: DofId) -> f64 {
        self.delayed_value(SensorRef::dof(SensorKind::DofVelocity, dof), 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_suffix_roundtrip() {
        assert_eq!(name_without_side("soleus_r"), "soleus");
        assert_eq!(name_without_side("soleus_l"), "soleus");
        assert_eq!(name_without_side("pelvis_tilt"), "pelvis_tilt");
        assert_eq!(Side::from_name(&name_with_side("vasti", Side::Left)), Side::Left);
        assert_eq!(Side::Right.mirrored(), Side::Left);
    }

    #[test]
    fn glob_patterns() {
        assert!(pattern_match("F", "*"));
        assert!(pattern_match("DP", "D?"));
        assert!(pattern_match("soleus_r", "sol*"));
        assert!(pattern_match("L", "F;L"));
        assert!(!pattern_match("V", "F;L"));
        assert!(pattern_match("gastroc_l", "*_l"));
        assert!(!pattern_match("gastroc_r", "*_l"));
    }

    #[test]
    fn sensor_tags() {
        assert_eq!(SensorKind::from_tag("DV"), Some(SensorKind::DofVelocity));
        assert_eq!(SensorKind::Spindle.tag(), "S");
        assert_eq!(SensorKind::from_tag("X"), None);
        assert!(SensorKind::Force.is_muscle());
        assert!(!SensorKind::DofPosition.is_muscle());
    }
}
