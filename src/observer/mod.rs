use serde::Serialize;

use crate::controller::{Controller, ControllerKind, ControllerReport};
use crate::network::{LayerKind, NeuralNetwork, NodeHandle};
use crate::reflex::ReflexController;

/// A read-only snapshot of a controller's graph after some steps.
///
/// Design intent:
/// - Observers cannot mutate or steer the controller.
/// - Snapshotting is *on-demand* and can allocate; the control loop stays unchanged.
/// - Edge contributions are running sums of |gain * source output| since construction.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkSnapshot {
    pub step: u64,
    pub layers: Vec<LayerSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerSnapshot {
    pub name: String,
    pub kind: LayerKind,
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub type_tag: String,
    pub offset: f64,
    pub input_sum: f64,
    pub output: f64,
    pub inputs: Vec<EdgeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeSnapshot {
    pub source: String,
    pub handle: NodeHandle,
    pub gain: f64,
    pub offset: f64,
    pub contribution: f64,
}

pub struct NetworkAdapter<'a> {
    net: &'a NeuralNetwork,
}

impl<'a> NetworkAdapter<'a> {
    pub fn new(net: &'a NeuralNetwork) -> Self {
        Self { net }
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        let layers = self
            .net
            .layers()
            .iter()
            .map(|layer| LayerSnapshot {
                name: layer.name().to_string(),
                kind: layer.kind(),
                nodes: layer
                    .nodes()
                    .iter()
                    .map(|n| NodeSnapshot {
                        name: n.name.clone(),
                        type_tag: n.type_tag.clone(),
                        offset: n.offset,
                        input_sum: n.input_sum(),
                        output: n.output(),
                        inputs: n
                            .inputs()
                            .iter()
                            .map(|i| EdgeSnapshot {
                                source: self.net.node(i.source).name.clone(),
                                handle: i.source,
                                gain: i.gain,
                                offset: i.offset,
                                contribution: i.contribution,
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        NetworkSnapshot {
            step: self.net.step(),
            layers,
        }
    }

    /// Edges ranked by accumulated contribution, largest first.
    pub fn strongest_edges(&self, limit: usize) -> Vec<(String, String, f64)> {
        let mut edges: Vec<(String, String, f64)> = self
            .net
            .layers()
            .iter()
            .flat_map(|l| l.nodes())
            .flat_map(|n| {
                n.inputs().iter().map(move |i| {
                    (
                        self.net.node(i.source).name.clone(),
                        n.name.clone(),
                        i.contribution,
                    )
                })
            })
            .collect();
        edges.sort_by(|a, b| b.2.total_cmp(&a.2));
        edges.truncate(limit);
        edges
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflexSnapshot {
    pub name: String,
    pub delay: f64,
    pub output: f64,
    pub suppressed_steps: u64,
    pub gated: bool,
}

pub struct ReflexAdapter<'a> {
    ctrl: &'a ReflexController,
}

impl<'a> ReflexAdapter<'a> {
    pub fn new(ctrl: &'a ReflexController) -> Self {
        Self { ctrl }
    }

    pub fn snapshot(&self) -> Vec<ReflexSnapshot> {
        self.ctrl
            .reflexes()
            .iter()
            .map(|r| ReflexSnapshot {
                name: r.name.clone(),
                delay: r.delay,
                output: r.output(),
                suppressed_steps: r.suppressed_steps(),
                gated: r.gate.is_some(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerSnapshot {
    Neural(NetworkSnapshot),
    Reflex { reflexes: Vec<ReflexSnapshot> },
}

pub struct ControllerAdapter<'a> {
    ctrl: &'a Controller,
}

impl<'a> ControllerAdapter<'a> {
    pub fn new(ctrl: &'a Controller) -> Self {
        Self { ctrl }
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        match self.ctrl.kind() {
            ControllerKind::Neural(c) => {
                ControllerSnapshot::Neural(NetworkAdapter::new(c.network()).snapshot())
            }
            ControllerKind::Reflex(c) => ControllerSnapshot::Reflex {
                reflexes: ReflexAdapter::new(c).snapshot(),
            },
        }
    }

    /// Report plus snapshot as one JSON document.
    pub fn to_json(&self, report: &ControllerReport) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Document<'r> {
            report: &'r ControllerReport,
            controller: ControllerSnapshot,
        }
        serde_json::to_string_pretty(&Document {
            report,
            controller: self.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionDecl, ControllerConfig, NeuralConfig, SensorDecl};
    use crate::model::{Anatomy, SensorKind, SensorRef, Simulation};
    use crate::params::{ParamDecl, ParamSet};
    use crate::testbed::Testbed;

    #[test]
    fn snapshot_reports_edges_and_outputs() {
        let mut body = Testbed::new();
        let soleus = body.find_actuator("soleus_r").unwrap();
        body.set_override(SensorRef::muscle(SensorKind::Force, soleus), 2.0);
        let cfg = ControllerConfig::Neural(
            NeuralConfig::new()
                .with_sensor(SensorDecl::new("F").include("soleus_r"))
                .with_motor_input(
                    ConnectionDecl::new("monosynaptic", "0").with_gain(ParamDecl::Fixed(0.25)),
                ),
        );
        let mut params = ParamSet::new(1);
        let mut ctrl = Controller::new(&cfg, &body, &mut params).unwrap();
        for _ in 0..3 {
            let t = body.time();
            ctrl.update(&mut body, t);
            body.advance(0.01);
        }

        let ControllerSnapshot::Neural(snap) = ControllerAdapter::new(&ctrl).snapshot() else {
            panic!("expected a neural snapshot");
        };
        assert_eq!(snap.step, 3);
        let motor = &snap.layers[1].nodes[soleus];
        assert_eq!(motor.output, 0.5);
        assert_eq!(motor.inputs[0].source, "soleus_r");
        assert_eq!(motor.inputs[0].contribution, 1.5);

        let ControllerKind::Neural(n) = ctrl.kind() else {
            unreachable!()
        };
        let top = NetworkAdapter::new(n.network()).strongest_edges(1);
        assert_eq!(top[0].1, "soleus_r");

        let report = ctrl.finalize();
        let json = ControllerAdapter::new(&ctrl).to_json(&report).unwrap();
        assert!(json.contains("\"state\": \"finalized\""));
    }
}
