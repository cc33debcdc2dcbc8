//! Decomposition of actuators into named "virtual muscle" contributions.
//!
//! Contribution names are side-less, so the left and right copies of an
//! actuator decompose into the same names and end up sharing parameters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{name_without_side, ActuatorId, Anatomy, AxisArm, DofId, JointId};

/// Moment arms below this magnitude do not count as actuating an axis.
pub const MIN_MOMENT_ARM: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMuscle {
    pub name: String,
    /// Always within [-1, 1]; the weights of one actuator need not sum to 1.
    pub correlation: f64,
    pub axes: Vec<(JointId, DofId)>,
}

impl VirtualMuscle {
    /// A contribution for something that is not an actuator (dof sensors,
    /// interneurons, pattern generators): its own name at full weight.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            correlation: 1.0,
            axes: Vec::new(),
        }
    }

    /// True when both act on one joint through different axes.
    ///
    /// Pairing such contributions would feed the torque about one axis back
    /// into a parameter for the other.
    pub fn crosses_axes(&self, other: &VirtualMuscle) -> bool {
        self.axes.iter().any(|&(ja, da)| {
            other
                .axes
                .iter()
                .any(|&(jb, db)| ja == jb && da != db)
        })
    }
}

/// Which end of a connection an actuator sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Target,
    Source,
}

/// How actuators are decomposed for parameter naming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterMode {
    /// One contribution per actuator, named after it.
    Muscle,
    /// One contribution per actuated axis.
    Dof,
    /// Recursive decomposition along the joint chain.
    #[default]
    Virtual,
    /// `Virtual` for targets, `Dof` for sources.
    VirtualDof,
}

/// Memo of decompositions for one controller instance.
///
/// Never shared between instances: each model instantiation builds its own.
#[derive(Debug, Clone, Default)]
pub struct CorrelationCache {
    mode: ParameterMode,
    memo: HashMap<(ActuatorId, Role), Vec<VirtualMuscle>>,
}

impl CorrelationCache {
    pub fn new(mode: ParameterMode) -> Self {
        Self {
            mode,
            memo: HashMap::new(),
        }
    }

    pub fn mode(&self) -> ParameterMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    /// Contributions of `actuator`, computed once per (actuator, role).
    ///
    /// An actuator without any actuated axis yields an empty list, meaning no
    /// parameter sharing is possible for it.
    pub fn decompose<A: Anatomy + ?Sized>(
        &mut self,
        anatomy: &A,
        actuator: ActuatorId,
        role: Role,
    ) -> Vec<VirtualMuscle> {
        let mode = self.mode;
        self.memo
            .entry((actuator, role))
            .or_insert_with(|| match (mode, role) {
                (ParameterMode::Muscle, _) => muscle_contribution(anatomy, actuator),
                (ParameterMode::Dof, _) | (ParameterMode::VirtualDof, Role::Source) => {
                    dof_contributions(anatomy, actuator)
                }
                (ParameterMode::Virtual, _) | (ParameterMode::VirtualDof, Role::Target) => {
                    virtual_contributions(anatomy, actuator)
                }
            })
            .clone()
    }
}

fn significant_axes<A: Anatomy + ?Sized>(anatomy: &A, actuator: ActuatorId) -> Vec<AxisArm> {
    anatomy
        .actuator_axes(actuator)
        .into_iter()
        .filter(|a| a.moment_arm.abs() >= MIN_MOMENT_ARM)
        .collect()
}

fn axis_name<A: Anatomy + ?Sized>(anatomy: &A, axis: &AxisArm) -> String {
    let sign = if axis.moment_arm > 0.0 { '+' } else { '-' };
    format!("{}{}", name_without_side(anatomy.dof_name(axis.dof)), sign)
}

fn norm(axes: &[AxisArm]) -> f64 {
    axes.iter().map(|a| a.moment_arm * a.moment_arm).sum::<f64>().sqrt()
}

fn muscle_contribution<A: Anatomy + ?Sized>(anatomy: &A, actuator: ActuatorId) -> Vec<VirtualMuscle> {
    let axes = significant_axes(anatomy, actuator);
    if axes.is_empty() {
        return Vec::new();
    }
    vec![VirtualMuscle {
        name: name_without_side(anatomy.actuator_name(actuator)).to_string(),
        correlation: 1.0,
        axes: axes.iter().map(|a| (a.joint, a.dof)).collect(),
    }]
}

fn dof_contributions<A: Anatomy + ?Sized>(anatomy: &A, actuator: ActuatorId) -> Vec<VirtualMuscle> {
    let axes = significant_axes(anatomy, actuator);
    let total = norm(&axes);
    axes.iter()
        .map(|a| VirtualMuscle {
            name: axis_name(anatomy, a),
            correlation: a.moment_arm.abs() / total,
            axes: vec![(a.joint, a.dof)],
        })
        .collect()
}

fn virtual_contributions<A: Anatomy + ?Sized>(
    anatomy: &A,
    actuator: ActuatorId,
) -> Vec<VirtualMuscle> {
    let axes = significant_axes(anatomy, actuator);
    if axes.is_empty() {
        return Vec::new();
    }

    // Consecutive axes on one joint form one link of the chain.
    let mut chain: Vec<(JointId, Vec<AxisArm>)> = Vec::new();
    for axis in axes {
        match chain.last_mut() {
            Some((joint, group)) if *joint == axis.joint => group.push(axis),
            _ => chain.push((axis.joint, vec![axis])),
        }
    }

    let mut path = Vec::new();
    walk_chain(anatomy, &chain, 0, &mut path)
}

fn walk_chain<A: Anatomy + ?Sized>(
    anatomy: &A,
    chain: &[(JointId, Vec<AxisArm>)],
    idx: usize,
    path: &mut Vec<JointId>,
) -> Vec<VirtualMuscle> {
    let Some((joint, axes)) = chain.get(idx) else {
        return vec![VirtualMuscle::named("")];
    };
    if path.contains(joint) {
        return walk_chain(anatomy, chain, idx + 1, path);
    }

    path.push(*joint);
    let tail = walk_chain(anatomy, chain, idx + 1, path);
    path.pop();

    let total = norm(axes);
    let mut out = Vec::with_capacity(axes.len() * tail.len());
    for axis in axes {
        let head = axis_name(anatomy, axis);
        let factor = axis.moment_arm.abs() / total;
        for rest in &tail {
            let mut covered = Vec::with_capacity(rest.axes.len() + 1);
            covered.push((axis.joint, axis.dof));
            covered.extend_from_slice(&rest.axes);
            out.push(VirtualMuscle {
                name: format!("{}{}", head, rest.name),
                correlation: factor * rest.correlation,
                axes: covered,
            });
        }
    }
    out
}
