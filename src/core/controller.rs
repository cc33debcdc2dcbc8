//! The entry point the simulation loop drives once per control step.

use serde::Serialize;
use tracing::info;

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::model::{Anatomy, SensorRef, Simulation};
use crate::neural::NeuralController;
use crate::params::ParamSet;
use crate::reflex::ReflexController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Constructed,
    Evaluating,
    Finalized,
}

#[derive(Debug, Clone)]
pub enum ControllerKind {
    Neural(NeuralController),
    Reflex(ReflexController),
}

/// Summary written once a controller is finalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerReport {
    pub signature: String,
    pub steps: u64,
    pub last_timestamp: f64,
    pub state: ControllerState,
}

#[derive(Debug, Clone)]
pub struct Controller {
    kind: ControllerKind,
    state: ControllerState,
    steps: u64,
    last_timestamp: f64,
}

impl Controller {
    /// Builds the controller against `anatomy`, binding every gain, offset and
    /// delay through `params`. Fails before any step runs.
    pub fn new<A: Anatomy + ?Sized>(
        config: &ControllerConfig,
        anatomy: &A,
        params: &mut ParamSet,
    ) -> Result<Self> {
        let kind = match config {
            ControllerConfig::Neural(cfg) => {
                ControllerKind::Neural(NeuralController::new(cfg, anatomy, params)?)
            }
            ControllerConfig::Reflex(cfg) => {
                ControllerKind::Reflex(ReflexController::new(cfg, anatomy, params)?)
            }
        };
        Ok(Self {
            kind,
            state: ControllerState::Constructed,
            steps: 0,
            last_timestamp: 0.0,
        })
    }

    /// Runs one control step. Returns false once finalized.
    pub fn update<S: Simulation + ?Sized>(&mut self, sim: &mut S, timestamp: f64) -> bool {
        if self.state == ControllerState::Finalized {
            return false;
        }
        self.state = ControllerState::Evaluating;
        match &mut self.kind {
            ControllerKind::Neural(c) => c.update(sim),
            ControllerKind::Reflex(c) => c.update(sim),
        }
        self.steps += 1;
        self.last_timestamp = timestamp;
        true
    }

    /// Stops further evaluation and reports what ran.
    pub fn finalize(&mut self) -> ControllerReport {
        self.state = ControllerState::Finalized;
        let report = ControllerReport {
            signature: self.signature(),
            steps: self.steps,
            last_timestamp: self.last_timestamp,
            state: self.state,
        };
        info!(
            "controller {} finalized after {} steps (t={:.3})",
            report.signature, report.steps, report.last_timestamp
        );
        report
    }

    pub fn kind(&self) -> &ControllerKind {
        &self.kind
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn signature(&self) -> String {
        match &self.kind {
            ControllerKind::Neural(c) => c.signature(),
            ControllerKind::Reflex(c) => c.signature(),
        }
    }

    pub fn required_sensors(&self) -> Vec<(SensorRef, f64)> {
        match &self.kind {
            ControllerKind::Neural(c) => c.required_sensors(),
            ControllerKind::Reflex(c) => c.required_sensors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionDecl, Locality, NeuralConfig, ReflexConfig, ReflexDecl, SensorDecl};
    use crate::params::ParamDecl;
    use crate::testbed::Testbed;

    fn reflex_config() -> ControllerConfig {
        ControllerConfig::Reflex(ReflexConfig::new(Locality::Both).with_reflex(ReflexDecl {
            kf: Some(ParamDecl::Fixed(1.0)),
            delay: Some(ParamDecl::Fixed(0.02)),
            ..ReflexDecl::muscle("gastroc")
        }))
    }

    #[test]
    fn lifecycle() {
        let mut body = Testbed::new();
        let mut params = ParamSet::new(1);
        let mut c = Controller::new(&reflex_config(), &body, &mut params).unwrap();
        assert_eq!(c.state(), ControllerState::Constructed);

        assert!(c.update(&mut body, 0.0));
        body.advance(0.01);
        assert!(c.update(&mut body, 0.01));
        assert_eq!(c.state(), ControllerState::Evaluating);

        let report = c.finalize();
        assert_eq!(report.steps, 2);
        assert_eq!(report.last_timestamp, 0.01);
        assert_eq!(report.signature, "R2");

        body.advance(0.01);
        assert!(!c.update(&mut body, 0.02));
        assert_eq!(c.steps(), 2);
        assert!(body.actuator_inputs().iter().all(|&u| u == 0.0));
    }

    #[test]
    fn dispatches_to_neural() {
        let body = Testbed::new();
        let cfg = ControllerConfig::Neural(
            NeuralConfig::new()
                .with_sensor(SensorDecl::new("L"))
                .with_motor_input(ConnectionDecl::new("monosynaptic", "0")),
        );
        let mut params = ParamSet::new(1);
        let c = Controller::new(&cfg, &body, &mut params).unwrap();
        assert!(matches!(c.kind(), ControllerKind::Neural(_)));
        assert_eq!(c.required_sensors().len(), body.actuator_count());
        assert!(c.signature().starts_with("N.V."));
    }

    #[test]
    fn controllers_move_between_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<Controller>();
        assert_send::<ParamSet>();
    }
}
