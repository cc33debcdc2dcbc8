//! Direct delayed sensor to actuator mappings, outside the layered graph.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::{ReflexConfig, ReflexDecl, ReflexKind};
use crate::error::{ConfigError, Result};
use crate::model::{
    name_with_side, ActuatorId, Anatomy, DofId, SensorKind, SensorRef, Side, Simulation,
};
use crate::params::{ParamDecl, ParamSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Signed distance outside the range: negative below, positive above.
    pub fn violation(&self, value: f64) -> f64 {
        if value < self.min {
            value - self.min
        } else if value > self.max {
            value - self.max
        } else {
            0.0
        }
    }
}

/// Parameter prefix of a reflex, collapsed when it senses its own target.
pub fn reflex_par_name(target: &str, source: &str) -> String {
    if target == source {
        target.to_string()
    } else {
        format!("{}-{}", target, source)
    }
}

/// Suppresses a reflex while its companion dof moves with its own range violation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflexGate {
    pub dof: DofId,
    /// Admissible position, in degrees.
    pub range: Range,
}

impl ReflexGate {
    pub fn suppresses(&self, position_deg: f64, velocity: f64) -> bool {
        if self.range.contains(position_deg) {
            return false;
        }
        let violation = self.range.violation(position_deg);
        violation.is_sign_negative() == velocity.is_sign_negative()
    }

    fn position(&self) -> SensorRef {
        SensorRef::dof(SensorKind::DofPosition, self.dof)
    }

    fn velocity(&self) -> SensorRef {
        SensorRef::dof(SensorKind::DofVelocity, self.dof)
    }
}

/// `gain * (sensor - reference)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflexTerm {
    pub sensor: SensorRef,
    pub gain: f64,
    pub reference: f64,
}

#[derive(Debug, Clone)]
pub struct Reflex {
    pub name: String,
    pub target: ActuatorId,
    pub delay: f64,
    pub min_control_value: f64,
    pub max_control_value: f64,
    pub bias: f64,
    pub terms: Vec<ReflexTerm>,
    pub gate: Option<ReflexGate>,

    output: f64,
    suppressed_steps: u64,
}

impl Reflex {
    /// Output added to the target during the most recent step.
    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn suppressed_steps(&self) -> u64 {
        self.suppressed_steps
    }

    pub fn compute<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        if let Some(gate) = &self.gate {
            let pos = sim.delayed_value(gate.position(), self.delay).to_degrees();
            let vel = sim.delayed_value(gate.velocity(), self.delay);
            if gate.suppresses(pos, vel) {
                trace!("{}: suppressed, pos={:.2} vel={:.3}", self.name, pos, vel);
                self.output = 0.0;
                self.suppressed_steps += 1;
                return;
            }
        }

        let mut u = self.bias;
        for term in &self.terms {
            u += term.gain * (sim.delayed_value(term.sensor, self.delay) - term.reference);
        }
        let u = u.max(self.min_control_value).min(self.max_control_value);
        sim.add_actuator_input(self.target, u);
        self.output = u;
    }

    /// Delayed channels this reflex reads.
    pub fn sensors(&self) -> impl Iterator<Item = SensorRef> + '_ {
        let gate = self
            .gate
            .iter()
            .flat_map(|g| [g.position(), g.velocity()]);
        self.terms.iter().map(|t| t.sensor).chain(gate)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReflexController {
    reflexes: Vec<Reflex>,
}

struct ReflexBuilder<'a> {
    params: &'a mut ParamSet,
    prefix: String,
}

impl ReflexBuilder<'_> {
    fn par(&mut self, key: &str, decl: Option<&ParamDecl>, default: f64) -> Result<f64> {
        let name = format!("{}.{}", self.prefix, key);
        self.params.get_or_create(&name, decl, default)
    }

    /// Adds a term only for declared gains, so undeclared sensors are never read.
    fn term(
        &mut self,
        terms: &mut Vec<ReflexTerm>,
        key: &str,
        decl: Option<&ParamDecl>,
        sensor: SensorRef,
        reference: f64,
        sign: f64,
    ) -> Result<()> {
        if decl.is_some() {
            let gain = self.par(key, decl, 0.0)?;
            terms.push(ReflexTerm {
                sensor,
                gain: sign * gain,
                reference,
            });
        }
        Ok(())
    }
}

impl ReflexController {
    /// Instantiates every declared reflex once per side of the locality.
    ///
    /// Parameters are named after the declared (side-less) names, so the
    /// sides share them.
    pub fn new<A: Anatomy + ?Sized>(
        config: &ReflexConfig,
        anatomy: &A,
        params: &mut ParamSet,
    ) -> Result<Self> {
        let mut reflexes = Vec::new();
        for side in config.locality.sides() {
            for decl in &config.reflexes {
                reflexes.push(Self::build(decl, *side, anatomy, params)?);
            }
        }
        debug!(
            "reflex controller: {} reflexes, {} parameters",
            reflexes.len(),
            params.len()
        );
        Ok(Self { reflexes })
    }

    fn build<A: Anatomy + ?Sized>(
        decl: &ReflexDecl,
        side: Side,
        anatomy: &A,
        params: &mut ParamSet,
    ) -> Result<Reflex> {
        let target_name = name_with_side(&decl.target, side);
        let target = anatomy
            .find_actuator(&target_name)
            .ok_or_else(|| ConfigError::UnknownActuator(target_name.clone()))?;
        let source_name = name_with_side(decl.source_name(), side);

        let min_control_value = decl.min_control_value.unwrap_or(f64::MIN);
        let max_control_value = decl.max_control_value.unwrap_or(f64::MAX);
        let prefix = reflex_par_name(&decl.target, decl.source_name());
        if min_control_value > max_control_value {
            return Err(ConfigError::InvalidParameter {
                name: prefix,
                reason: "min_control_value exceeds max_control_value".to_string(),
            });
        }

        let Some(delay_decl) = decl.delay.as_ref() else {
            return Err(ConfigError::InvalidParameter {
                name: format!("{}.delay", prefix),
                reason: "a reflex needs a delay".to_string(),
            });
        };

        let mut b = ReflexBuilder { params, prefix };
        let delay = b.par("delay", Some(delay_decl), 0.0)?;
        let bias = b.par("C0", decl.c0.as_ref(), 0.0)?;

        let mut terms = Vec::new();
        match decl.kind {
            ReflexKind::Muscle => {
                let source = anatomy
                    .find_actuator(&source_name)
                    .ok_or_else(|| ConfigError::UnknownActuator(source_name.clone()))?;
                let sensor = |kind| SensorRef::muscle(kind, source);
                let l0 = b.par("L0", decl.l0.as_ref(), 1.0)?;
                b.term(&mut terms, "KL", decl.kl.as_ref(), sensor(SensorKind::Length), l0, 1.0)?;
                b.term(&mut terms, "KV", decl.kv.as_ref(), sensor(SensorKind::Velocity), 0.0, 1.0)?;
                b.term(&mut terms, "KF", decl.kf.as_ref(), sensor(SensorKind::Force), 0.0, 1.0)?;
                b.term(&mut terms, "KS", decl.ks.as_ref(), sensor(SensorKind::Spindle), 0.0, 1.0)?;
            }
            ReflexKind::Dof => {
                let source = anatomy
                    .find_dof(&source_name)
                    .ok_or_else(|| ConfigError::UnknownDof(source_name.clone()))?;
                let sensor = |kind| SensorRef::dof(kind, source);
                // Drives toward P0 / V0 (radians, radians per second).
                let p0 = b.par("P0", decl.p0.as_ref(), 0.0)?;
                let v0 = b.par("V0", decl.v0.as_ref(), 0.0)?;
                b.term(&mut terms, "KP", decl.kp.as_ref(), sensor(SensorKind::DofPosition), p0, -1.0)?;
                b.term(&mut terms, "KV", decl.kv.as_ref(), sensor(SensorKind::DofVelocity), v0, -1.0)?;
            }
        }

        let gate = match &decl.condition {
            Some(cond) => {
                let dof_name = name_with_side(&cond.dof, side);
                let dof = anatomy
                    .find_dof(&dof_name)
                    .ok_or(ConfigError::UnknownDof(dof_name))?;
                Some(ReflexGate {
                    dof,
                    range: cond.pos_range,
                })
            }
            None => None,
        };

        Ok(Reflex {
            name: reflex_par_name(&target_name, &source_name),
            target,
            delay,
            min_control_value,
            max_control_value,
            bias,
            terms,
            gate,
            output: 0.0,
            suppressed_steps: 0,
        })
    }

    pub fn update<S: Simulation + ?Sized>(&mut self, sim: &mut S) {
        for reflex in &mut self.reflexes {
            reflex.compute(sim);
        }
    }

    pub fn reflexes(&self) -> &[Reflex] {
        &self.reflexes
    }

    /// (channel, delay) pairs the delayed-sensor buffer must record.
    pub fn required_sensors(&self) -> Vec<(SensorRef, f64)> {
        let mut out: Vec<(SensorRef, f64)> = Vec::new();
        for r in &self.reflexes {
            for s in r.sensors() {
                if !out.iter().any(|(o, d)| *o == s && *d == r.delay) {
                    out.push((s, r.delay));
                }
            }
        }
        out
    }

    pub fn signature(&self) -> String {
        format!("R{}", self.reflexes.len())
    }
}
