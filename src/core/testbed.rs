//! A deterministic bilateral leg used by the tests, the benches and the demo.
//!
//! This is not a physics engine. Joint angles follow fixed sinusoids (the
//! right leg half a cycle behind the left), muscle signals are derived from
//! them through the moment arms, and a delayed sensor value is simply the
//! signal evaluated `delay` seconds earlier. Actuator inputs are accumulated
//! per step so the controller's output can be inspected.

use std::collections::HashMap;

use tracing::warn;

use crate::controller::Controller;
use crate::error::Result;
use crate::model::{
    name_with_side, ActuatorId, Anatomy, AxisArm, DofId, JointId, SensorKind, SensorRef, Side,
    Simulation,
};
use crate::params::{ParamPoint, ParamSet};
use crate::config::ControllerConfig;

const GAIT_FREQUENCY: f64 = 1.0;

#[derive(Debug, Clone)]
struct DofSpec {
    name: String,
    joint: JointId,
    amplitude: f64,
    phase: f64,
}

#[derive(Debug, Clone)]
struct ActuatorSpec {
    name: String,
    axes: Vec<AxisArm>,
}

// (dof, joint, amplitude in rad)
const LEG_DOFS: [(&str, &str, f64); 4] = [
    ("hip_flexion", "hip", 0.5),
    ("hip_adduction", "hip", 0.1),
    ("knee_angle", "knee", 0.6),
    ("ankle_angle", "ankle", 0.3),
];

// (muscle, [(dof, moment arm in m)])
const LEG_MUSCLES: [(&str, &[(&str, f64)]); 7] = [
    ("iliopsoas", &[("hip_flexion", 0.05)]),
    ("glut_max", &[("hip_flexion", -0.06), ("hip_adduction", -0.02)]),
    ("hamstrings", &[("hip_flexion", -0.07), ("knee_angle", -0.03)]),
    ("vasti", &[("knee_angle", 0.04)]),
    ("gastroc", &[("knee_angle", -0.02), ("ankle_angle", -0.05)]),
    ("soleus", &[("ankle_angle", -0.05)]),
    ("tib_ant", &[("ankle_angle", 0.04)]),
];

#[derive(Debug, Clone)]
pub struct Testbed {
    joints: Vec<String>,
    dofs: Vec<DofSpec>,
    actuators: Vec<ActuatorSpec>,

    time: f64,
    inputs: Vec<f64>,
    overrides: HashMap<SensorRef, f64>,
}

impl Default for Testbed {
    fn default() -> Self {
        Self::new()
    }
}

impl Testbed {
    pub fn new() -> Self {
        let mut body = Self {
            joints: vec!["pelvis".to_string()],
            dofs: vec![DofSpec {
                name: "pelvis_tilt".to_string(),
                joint: 0,
                amplitude: 0.05,
                phase: 0.0,
            }],
            actuators: Vec::new(),
            time: 0.0,
            inputs: Vec::new(),
            overrides: HashMap::new(),
        };

        for (side, phase) in [(Side::Left, 0.0), (Side::Right, core::f64::consts::PI)] {
            for (dof, joint, amplitude) in LEG_DOFS {
                let joint_name = name_with_side(joint, side);
                let joint = match body.joints.iter().position(|j| *j == joint_name) {
                    Some(j) => j,
                    None => {
                        body.joints.push(joint_name);
                        body.joints.len() - 1
                    }
                };
                body.dofs.push(DofSpec {
                    name: name_with_side(dof, side),
                    joint,
                    amplitude,
                    phase,
                });
            }
        }

        for side in [Side::Left, Side::Right] {
            for (muscle, arms) in LEG_MUSCLES {
                let arms: Vec<(String, f64)> = arms
                    .iter()
                    .map(|(dof, arm)| (name_with_side(dof, side), *arm))
                    .collect();
                body.push_actuator(&name_with_side(muscle, side), &arms);
            }
        }
        body
    }

    /// Adds an extra actuator spanning the named dofs, in the given order.
    pub fn with_actuator(mut self, name: &str, arms: &[(&str, f64)]) -> Self {
        let arms: Vec<(String, f64)> = arms.iter().map(|(d, a)| (d.to_string(), *a)).collect();
        self.push_actuator(name, &arms);
        self
    }

    fn push_actuator(&mut self, name: &str, arms: &[(String, f64)]) {
        let mut axes = Vec::with_capacity(arms.len());
        for (dof_name, arm) in arms {
            match self.find_dof(dof_name) {
                Some(dof) => axes.push(AxisArm {
                    joint: self.dofs[dof].joint,
                    dof,
                    moment_arm: *arm,
                }),
                None => warn!("testbed: actuator {} spans unknown dof {}", name, dof_name),
            }
        }
        self.actuators.push(ActuatorSpec {
            name: name.to_string(),
            axes,
        });
        self.inputs.push(0.0);
    }

    /// Pins a sensor to a constant, regardless of time and delay.
    pub fn set_override(&mut self, sensor: SensorRef, value: f64) {
        self.overrides.insert(sensor, value);
    }

    pub fn clear_overrides(&mut self) {
        self.overrides.clear();
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// Moves to the next control step and clears the actuator inputs.
    pub fn advance(&mut self, dt: f64) {
        self.time += dt;
        self.inputs.fill(0.0);
    }

    pub fn actuator_input(&self, actuator: ActuatorId) -> f64 {
        self.inputs[actuator]
    }

    pub fn actuator_inputs(&self) -> &[f64] {
        &self.inputs
    }

    fn dof_signal(&self, dof: DofId, t: f64) -> (f64, f64) {
        let d = &self.dofs[dof];
        let w = core::f64::consts::TAU * GAIT_FREQUENCY;
        let arg = w * t + d.phase;
        (d.amplitude * arg.sin(), d.amplitude * w * arg.cos())
    }

    fn muscle_signal(&self, actuator: ActuatorId, kind: SensorKind, t: f64) -> f64 {
        // Fibres lengthen when the joint rotates against the moment arm.
        let mut length = 1.0;
        let mut velocity = 0.0;
        for axis in &self.actuators[actuator].axes {
            let (pos, vel) = self.dof_signal(axis.dof, t);
            length -= 5.0 * axis.moment_arm * pos;
            velocity -= 5.0 * axis.moment_arm * vel;
        }
        match kind {
            SensorKind::Length => length,
            SensorKind::Velocity => velocity,
            SensorKind::Force => (0.5 + 2.0 * (length - 1.0)).max(0.0),
            SensorKind::Spindle => (length - 1.0).max(0.0) + 0.1 * velocity.max(0.0),
            SensorKind::DofPosition | SensorKind::DofVelocity => 0.0,
        }
    }
}

impl Anatomy for Testbed {
    fn actuator_count(&self) -> usize {
        self.actuators.len()
    }

    fn actuator_name(&self, actuator: ActuatorId) -> &str {
        &self.actuators[actuator].name
    }

    fn dof_count(&self) -> usize {
        self.dofs.len()
    }

    fn dof_name(&self, dof: DofId) -> &str {
        &self.dofs[dof].name
    }

    fn actuator_axes(&self, actuator: ActuatorId) -> Vec<AxisArm> {
        self.actuators[actuator].axes.clone()
    }

    fn shares_joint(&self, a: ActuatorId, b: ActuatorId) -> bool {
        let (a, b) = (&self.actuators[a].axes, &self.actuators[b].axes);
        a.iter().any(|x| b.iter().any(|y| x.joint == y.joint))
    }

    fn is_agonist(&self, a: ActuatorId, b: ActuatorId) -> bool {
        let (a, b) = (&self.actuators[a].axes, &self.actuators[b].axes);
        a.iter().any(|x| {
            b.iter()
                .any(|y| x.dof == y.dof && x.moment_arm.signum() == y.moment_arm.signum())
        })
    }

    fn is_antagonist(&self, a: ActuatorId, b: ActuatorId) -> bool {
        let (a, b) = (&self.actuators[a].axes, &self.actuators[b].axes);
        a.iter().any(|x| {
            b.iter()
                .any(|y| x.dof == y.dof && x.moment_arm.signum() != y.moment_arm.signum())
        })
    }
}

impl Simulation for Testbed {
    fn time(&self) -> f64 {
        self.time
    }

    fn delayed_value(&self, sensor: SensorRef, delay: f64) -> f64 {
        if let Some(&v) = self.overrides.get(&sensor) {
            return v;
        }
        let t = self.time - delay;
        match sensor.kind {
            SensorKind::DofPosition => self.dof_signal(sensor.target, t).0,
            SensorKind::DofVelocity => self.dof_signal(sensor.target, t).1,
            kind => self.muscle_signal(sensor.target, kind, t),
        }
    }

    fn add_actuator_input(&mut self, actuator: ActuatorId, value: f64) {
        self.inputs[actuator] += value;
    }
}

/// Outcome of driving one controller instance over a fixed horizon.
#[derive(Debug, Clone)]
pub struct Episode {
    pub steps: usize,
    /// Integral of the summed squared actuator inputs.
    pub effort: f64,
    pub final_inputs: Vec<f64>,
    pub parameters: usize,
    pub signature: String,
}

/// Builds a fresh body, parameter set and controller, then runs `steps` control steps.
pub fn run_episode(
    config: &ControllerConfig,
    point: &ParamPoint,
    seed: u64,
    steps: usize,
    dt: f64,
) -> Result<Episode> {
    let mut body = Testbed::new();
    let mut params = ParamSet::from_point(point.clone(), seed);
    let mut controller = Controller::new(config, &body, &mut params)?;

    let mut effort = 0.0;
    let mut final_inputs = Vec::new();
    for step in 0..steps {
        let t = body.time();
        controller.update(&mut body, t);
        effort += body.inputs.iter().map(|u| u * u).sum::<f64>() * dt;
        if step + 1 == steps {
            final_inputs = body.inputs.clone();
        }
        body.advance(dt);
    }
    controller.finalize();

    Ok(Episode {
        steps,
        effort,
        final_inputs,
        parameters: params.len(),
        signature: controller.signature(),
    })
}
