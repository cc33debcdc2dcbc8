use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::prng::Prng;

/// Parameter values supplied by an optimizer, keyed by symbolic name.
pub type ParamPoint = BTreeMap<String, f64>;

/// Which of a connection's two bound scalars is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Gain,
    Offset,
}

impl ParamKind {
    /// Marker appended to the symbolic name.
    pub fn suffix(self) -> &'static str {
        match self {
            ParamKind::Gain => "",
            ParamKind::Offset => "0",
        }
    }
}

/// A parameter as written in a configuration: a bare number is a fixed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamDecl {
    Fixed(f64),
    Distribution(Distribution),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Distribution {
    pub mean: f64,
    pub std: f64,
    pub init_min: f64,
    pub init_max: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub free: Option<bool>,
}

impl ParamDecl {
    pub fn gauss(mean: f64, std: f64) -> Self {
        ParamDecl::Distribution(Distribution {
            mean,
            std,
            ..Distribution::default()
        })
    }

    pub fn uniform(init_min: f64, init_max: f64) -> Self {
        ParamDecl::Distribution(Distribution {
            init_min,
            init_max,
            ..Distribution::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub init_mean: f64,
    pub init_std: f64,
    pub init_min: f64,
    pub init_max: f64,
    pub min: f64,
    pub max: f64,
    pub is_free: bool,
}

impl ParamInfo {
    pub fn fixed(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            init_mean: value,
            init_std: 0.0,
            init_min: value,
            init_max: value,
            min: f64::MIN,
            max: f64::MAX,
            is_free: false,
        }
    }

    pub fn from_decl(name: &str, decl: &ParamDecl) -> Result<Self> {
        let d = match decl {
            ParamDecl::Fixed(v) => return Ok(Self::fixed(name, *v)),
            ParamDecl::Distribution(d) => d,
        };
        let invalid = |reason: &str| ConfigError::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if d.std < 0.0 {
            return Err(invalid("negative standard deviation"));
        }
        if d.init_min > d.init_max {
            return Err(invalid("init_min exceeds init_max"));
        }
        let min = d.min.unwrap_or(f64::MIN);
        let max = d.max.unwrap_or(f64::MAX);
        if min > max {
            return Err(invalid("min exceeds max"));
        }
        Ok(Self {
            name: name.to_string(),
            init_mean: d.mean,
            init_std: d.std,
            init_min: d.init_min,
            init_max: d.init_max,
            min,
            max,
            is_free: d.free.unwrap_or(true),
        })
    }

    pub fn restrain(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Draws a starting value: gaussian when mean/std are given, uniform otherwise.
    pub fn initial_value(&self, rng: &mut Prng) -> f64 {
        if !self.is_free {
            return self.init_mean;
        }
        if self.init_mean != 0.0 || self.init_std != 0.0 {
            self.restrain(rng.gauss(self.init_mean, self.init_std))
        } else {
            self.restrain(rng.gen_range_f64(self.init_min, self.init_max))
        }
    }
}

/// Name-keyed store of optimizable scalars for one controller instance.
///
/// The first lookup of a name creates the entry; every later lookup of the
/// same name returns the same value, which is how symmetric actuators end up
/// sharing one parameter. A name first requested without a declaration is
/// pinned to its default and stays out of [`ParamSet::infos`] and
/// [`ParamSet::to_point`].
#[derive(Debug, Clone)]
pub struct ParamSet {
    infos: Vec<ParamInfo>,
    values: Vec<f64>,
    index: HashMap<String, usize>,
    pinned: HashMap<String, f64>,

    // Values proposed by the optimizer; names absent here are drawn from `rng`.
    point: ParamPoint,
    rng: Prng,
}

impl ParamSet {
    pub fn new(seed: u64) -> Self {
        Self::from_point(ParamPoint::new(), seed)
    }

    pub fn from_point(point: ParamPoint, seed: u64) -> Self {
        Self {
            infos: Vec::new(),
            values: Vec::new(),
            index: HashMap::new(),
            pinned: HashMap::new(),
            point,
            rng: Prng::new(seed),
        }
    }

    /// Returns the value bound to `name`, creating it from `decl` on first use.
    ///
    /// Without a declaration the `default` is pinned to `name` and returned;
    /// nothing is registered as optimizable.
    pub fn get_or_create(
        &mut self,
        name: &str,
        decl: Option<&ParamDecl>,
        default: f64,
    ) -> Result<f64> {
        if let Some(&i) = self.index.get(name) {
            return Ok(self.values[i]);
        }
        if let Some(&v) = self.pinned.get(name) {
            return Ok(v);
        }
        let Some(decl) = decl else {
            self.pinned.insert(name.to_string(), default);
            return Ok(default);
        };

        let info = ParamInfo::from_decl(name, decl)?;
        let value = match self.point.get(name) {
            Some(&v) if info.is_free => info.restrain(v),
            _ => info.initial_value(&mut self.rng),
        };

        self.index.insert(name.to_string(), self.infos.len());
        self.infos.push(info);
        self.values.push(value);
        Ok(value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.index.get(name).map(|&i| self.values[i])
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.infos.iter().filter(|i| i.is_free).count()
    }

    /// Registered parameters in creation order.
    pub fn infos(&self) -> &[ParamInfo] {
        &self.infos
    }

    pub fn values_by_name(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.infos
            .iter()
            .zip(self.values.iter().copied())
            .map(|(info, v)| (info.name.as_str(), v))
    }

    /// The free values, suitable for feeding back to an optimizer.
    pub fn to_point(&self) -> ParamPoint {
        self.infos
            .iter()
            .zip(&self.values)
            .filter(|(info, _)| info.is_free)
            .map(|(info, &v)| (info.name.clone(), v))
            .collect()
    }
}
