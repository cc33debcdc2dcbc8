use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Transfer function applied to a node's summed input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// max(0, x)
    #[default]
    Rectifier,
    Linear,
    Tanh,
    /// Logistic, in (0, 1).
    Sigmoid,
    /// max(0, tanh(x))
    TanhRectified,
}

// Shared read-only by every controller instance.
const ACTIVATIONS: [(&str, Activation); 5] = [
    ("rectifier", Activation::Rectifier),
    ("linear", Activation::Linear),
    ("tanh", Activation::Tanh),
    ("sigmoid", Activation::Sigmoid),
    ("tanh_rectified", Activation::TanhRectified),
];

impl Activation {
    pub fn from_name(name: &str) -> Result<Activation> {
        ACTIVATIONS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, a)| *a)
            .ok_or_else(|| ConfigError::UnknownActivation(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        ACTIVATIONS
            .iter()
            .find(|(_, a)| *a == self)
            .map(|(n, _)| *n)
            .unwrap_or("rectifier")
    }

    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Rectifier => x.max(0.0),
            Activation::Linear => x,
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::TanhRectified => x.tanh().max(0.0),
        }
    }
}

impl core::str::FromStr for Activation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Activation::from_name(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(Activation::from_name("linear").unwrap(), Activation::Linear);
        assert_eq!("tanh".parse::<Activation>().unwrap(), Activation::Tanh);
        assert!(matches!(
            Activation::from_name("relu6"),
            Err(ConfigError::UnknownActivation(_))
        ));
        for (name, a) in ACTIVATIONS {
            assert_eq!(a.name(), name);
        }
    }

    #[test]
    fn transfer_values() {
        assert_eq!(Activation::Rectifier.apply(-0.3), 0.0);
        assert_eq!(Activation::Rectifier.apply(0.3), 0.3);
        assert_eq!(Activation::Linear.apply(-2.0), -2.0);
        assert_eq!(Activation::Sigmoid.apply(0.0), 0.5);
        assert_eq!(Activation::TanhRectified.apply(-1.0), 0.0);
        assert!((Activation::Tanh.apply(0.5) - 0.5f64.tanh()).abs() < 1e-15);
    }
}
