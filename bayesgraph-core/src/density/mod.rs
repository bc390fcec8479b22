//! Log-Density Functions
//!
//! A stochastic node delegates its probability model to a [`LogDensity`]:
//! a deterministic function from `(value, parameter values)` to a
//! log-probability, where `-inf` marks an impossible value. Densities that can
//! also draw values implement [`LogDensity::sample`]; only those nodes can be
//! redrawn by the initializer.
//!
//! Parameters reach the density as [`Params`], the node's parent mapping with
//! every parent node already resolved to its current value.

pub mod kernels;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::RngCore;

use crate::error::{Result, UsageError};
use crate::value::{Shape, Value};

pub use kernels::{
    discrete_uniform_logp, exponential_logp, normal_logp, poisson_logp, uniform_logp,
    DiscreteUniform, Exponential, Normal, Poisson, Uniform,
};

/// Resolved parameter values, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: IndexMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Builder-style insert, handy for calling densities directly.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Result<&Value, UsageError> {
        self.values.get(name).ok_or_else(|| UsageError::UnboundParameter {
            parameter: name.to_string(),
        })
    }

    /// A scalar parameter read as a real number.
    pub fn real(&self, name: &str) -> Result<f64, UsageError> {
        self.get(name)?.as_real().ok_or_else(|| UsageError::ParameterType {
            parameter: name.to_string(),
            expected: "a scalar number",
        })
    }

    /// A scalar parameter read as an integer.
    pub fn int(&self, name: &str) -> Result<i64, UsageError> {
        self.get(name)?.as_int().ok_or_else(|| UsageError::ParameterType {
            parameter: name.to_string(),
            expected: "a scalar integer",
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// The log-density collaborator of a stochastic node.
pub trait LogDensity: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str;

    /// Parameter names the density accepts. A node must bind exactly these.
    fn parameters(&self) -> &[&str];

    /// Log-probability of `value` given `params`. Must not use randomness.
    fn logp(&self, value: &Value, params: &Params) -> Result<f64>;

    /// Whether [`sample`](Self::sample) is implemented.
    fn can_sample(&self) -> bool {
        false
    }

    /// Draw a value of the given shape. `None` when the density has no sampler.
    fn sample(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Option<Result<Value>> {
        let _ = (params, shape, rng);
        None
    }
}

type LogpFn = dyn Fn(&Value, &Params) -> Result<f64> + Send + Sync;
type SampleFn = dyn Fn(&Params, Shape, &mut dyn RngCore) -> Result<Value> + Send + Sync;

/// A [`LogDensity`] assembled from closures.
///
/// This is how hand-written likelihoods are declared:
///
/// ```rust
/// use bayesgraph_core::density::{poisson_logp, FnDensity};
///
/// let changepoint = FnDensity::new("changepoint", &["s", "e", "l"], |value, params| {
///     let s = params.int("s")?.max(0) as usize;
///     Ok(poisson_logp(&value.slice(0, s), params.real("e")?)
///         + poisson_logp(&value.slice(s, value.len()), params.real("l")?))
/// });
/// # let _ = changepoint;
/// ```
pub struct FnDensity {
    name: String,
    parameters: Vec<&'static str>,
    logp: Arc<LogpFn>,
    sample: Option<Arc<SampleFn>>,
}

impl FnDensity {
    pub fn new<F>(name: impl Into<String>, parameters: &[&'static str], logp: F) -> Self
    where
        F: Fn(&Value, &Params) -> Result<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parameters: parameters.to_vec(),
            logp: Arc::new(logp),
            sample: None,
        }
    }

    /// Attach a sampler so nodes using this density can be redrawn.
    pub fn with_sampler<F>(mut self, sample: F) -> Self
    where
        F: Fn(&Params, Shape, &mut dyn RngCore) -> Result<Value> + Send + Sync + 'static,
    {
        self.sample = Some(Arc::new(sample));
        self
    }
}

impl LogDensity for FnDensity {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> &[&str] {
        &self.parameters
    }

    fn logp(&self, value: &Value, params: &Params) -> Result<f64> {
        (self.logp)(value, params)
    }

    fn can_sample(&self) -> bool {
        self.sample.is_some()
    }

    fn sample(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Option<Result<Value>> {
        self.sample.as_ref().map(|f| f(params, shape, rng))
    }
}

impl fmt::Debug for FnDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnDensity")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("can_sample", &self.sample.is_some())
            .finish()
    }
}

/// A log-probability counts as valid when it is finite.
pub fn is_valid_logp(logp: f64) -> bool {
    logp.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn params_type_checks() {
        let params = Params::new().with("mu", 1.5).with("xs", vec![1.0, 2.0]);
        assert_eq!(params.real("mu").unwrap(), 1.5);
        assert!(matches!(
            params.real("xs"),
            Err(UsageError::ParameterType { .. })
        ));
        assert!(matches!(
            params.real("sigma"),
            Err(UsageError::UnboundParameter { .. })
        ));
    }

    #[test]
    fn fn_density_without_sampler() {
        let d = FnDensity::new("flat", &[], |_, _| Ok(0.0));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(!d.can_sample());
        assert!(d.sample(&Params::new(), Shape::Scalar, &mut rng).is_none());
        assert_eq!(d.logp(&Value::Real(3.0), &Params::new()).unwrap(), 0.0);
    }

    #[test]
    fn invalid_logp_values() {
        assert!(is_valid_logp(-3.2));
        assert!(!is_valid_logp(f64::NEG_INFINITY));
        assert!(!is_valid_logp(f64::NAN));
    }
}
