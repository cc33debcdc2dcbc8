//! # spinal
//!
//! Reflex and layered neural controllers for musculoskeletal simulation.
//!
//! A controller is built once per simulation run from a declarative
//! configuration. Connection rules (by anatomical relation, body side or
//! name) are resolved into a weighted graph whose gains and offsets are bound
//! to shared, optimizable parameters; left and right copies of an actuator
//! collapse onto the same parameter names. The graph is then evaluated once
//! per control step against time-delayed sensor readings.
//!
//! ## Quick Start
//!
//! ```
//! use spinal::prelude::*;
//!
//! let config = ControllerConfig::from_json_str(r#"{
//!     "type": "neural",
//!     "sensors": [ { "type": "F" } ],
//!     "motor": { "inputs": [ { "connect": "monosynaptic", "gain": { "mean": 0.5, "std": 0.1 } } ] }
//! }"#).unwrap();
//!
//! let mut body = Testbed::new();
//! let mut params = ParamSet::new(42);
//! let mut controller = Controller::new(&config, &body, &mut params).unwrap();
//!
//! for _ in 0..100 {
//!     let t = body.time();
//!     controller.update(&mut body, t);
//!     body.advance(0.005);
//! }
//! let report = controller.finalize();
//! assert_eq!(report.steps, 100);
//! ```
//!
//! ## Feature Flags
//!
//! - `parallel` (default): evaluate independent instances on a rayon pool
//!
//! ## Modules
//!
//! - [`params`]: name-keyed parameter binding
//! - [`correlation`]: actuator decomposition into virtual muscles
//! - [`connection`]: connection rules and parameter naming
//! - [`network`]: the node graph
//! - [`neural`] / [`reflex`]: the two controller types
//! - [`controller`]: the per-step entry point
//! - [`batch`]: parallel evaluation of many instances
//! - [`observer`]: read-only snapshots

#[path = "core/activation.rs"]
pub mod activation;

#[path = "core/batch.rs"]
pub mod batch;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/connection.rs"]
pub mod connection;

#[path = "core/controller.rs"]
pub mod controller;

#[path = "core/correlation.rs"]
pub mod correlation;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/model.rs"]
pub mod model;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/neural.rs"]
pub mod neural;

#[path = "core/params.rs"]
pub mod params;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/reflex.rs"]
pub mod reflex;

#[path = "core/testbed.rs"]
pub mod testbed;

pub mod observer;

pub use error::{ConfigError, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::activation::Activation;
    pub use crate::batch::BatchRunner;
    pub use crate::config::{
        ConnectionDecl, ControllerConfig, InterLayerDecl, InterNodeDecl, Locality, NeuralConfig,
        ReflexConfig, ReflexDecl, SensorDecl,
    };
    pub use crate::connection::{ConnectionKind, SynergyPolicy};
    pub use crate::controller::{Controller, ControllerReport, ControllerState};
    pub use crate::correlation::ParameterMode;
    pub use crate::error::{ConfigError, Result};
    pub use crate::model::{Anatomy, SensorKind, SensorRef, Side, Simulation};
    pub use crate::params::{ParamDecl, ParamPoint, ParamSet};
    pub use crate::reflex::Range;
    pub use crate::testbed::{run_episode, Episode, Testbed};
}
