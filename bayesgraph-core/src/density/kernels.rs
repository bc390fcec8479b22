//! Stock Kernels
//!
//! Closed-form log-densities for a handful of common distributions. The
//! `*_logp` functions sum the elementwise log-density over scalars or vectors
//! and return `-inf` whenever any element or parameter is out of support.

use std::f64::consts::PI;

use rand::{Rng, RngCore};

use super::{LogDensity, Params};
use crate::error::Result;
use crate::value::{Shape, Value};

const LANCZOS_G: f64 = 7.0;

#[allow(clippy::excessive_precision)]
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// `ln Γ(x)` for `x >= 0.5` (Lanczos approximation).
fn ln_gamma(x: f64) -> f64 {
    let x = x - 1.0;
    let mut a = LANCZOS[0];
    for (i, c) in LANCZOS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    let t = x + LANCZOS_G + 0.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// `ln k!`, continued to real `k >= 0` through the gamma function.
fn ln_factorial(k: f64) -> f64 {
    if k < 16.0 && k.fract() == 0.0 {
        (2..=k as u64).map(|i| (i as f64).ln()).sum()
    } else {
        ln_gamma(k + 1.0)
    }
}

/// Continuous uniform on `[lower, upper]`.
pub fn uniform_logp(value: &Value, lower: f64, upper: f64) -> f64 {
    if !(upper > lower) {
        return f64::NEG_INFINITY;
    }
    let width = (upper - lower).ln();
    value
        .reals()
        .map(|x| if (lower..=upper).contains(&x) { -width } else { f64::NEG_INFINITY })
        .sum()
}

/// Uniform over the integers `lower..=upper`.
pub fn discrete_uniform_logp(value: &Value, lower: i64, upper: i64) -> f64 {
    if upper < lower {
        return f64::NEG_INFINITY;
    }
    let width = (upper as f64 - lower as f64 + 1.0).ln();
    value
        .reals()
        .map(|x| {
            if x.fract() == 0.0 && x >= lower as f64 && x <= upper as f64 {
                -width
            } else {
                f64::NEG_INFINITY
            }
        })
        .sum()
}

/// Exponential with the given rate.
pub fn exponential_logp(value: &Value, rate: f64) -> f64 {
    if !(rate > 0.0) {
        return f64::NEG_INFINITY;
    }
    let ln_rate = rate.ln();
    value
        .reals()
        .map(|x| if x >= 0.0 { ln_rate - rate * x } else { f64::NEG_INFINITY })
        .sum()
}

/// Poisson with mean `mu`. Negative counts are impossible; non-integer
/// counts are scored through the gamma-function continuation of `k!`.
pub fn poisson_logp(value: &Value, mu: f64) -> f64 {
    if !(mu >= 0.0) || !mu.is_finite() {
        return f64::NEG_INFINITY;
    }
    value
        .reals()
        .map(|k| {
            if !(k >= 0.0) || !k.is_finite() {
                f64::NEG_INFINITY
            } else if mu == 0.0 {
                if k == 0.0 { 0.0 } else { f64::NEG_INFINITY }
            } else {
                k * mu.ln() - mu - ln_factorial(k)
            }
        })
        .sum()
}

/// Normal with mean `mu` and precision `tau`.
pub fn normal_logp(value: &Value, mu: f64, tau: f64) -> f64 {
    if !(tau > 0.0) {
        return f64::NEG_INFINITY;
    }
    let norm = 0.5 * (tau / (2.0 * PI)).ln();
    value
        .reals()
        .map(|x| norm - 0.5 * tau * (x - mu) * (x - mu))
        .sum()
}

fn fill_real(shape: Shape, mut draw: impl FnMut() -> f64) -> Value {
    match shape {
        Shape::Scalar => Value::Real(draw()),
        Shape::Vector(n) => Value::RealArray((0..n).map(|_| draw()).collect()),
    }
}

fn fill_int(shape: Shape, mut draw: impl FnMut() -> i64) -> Value {
    match shape {
        Shape::Scalar => Value::Int(draw()),
        Shape::Vector(n) => Value::IntArray((0..n).map(|_| draw()).collect()),
    }
}

/// Uniform on `(0, 1]`, safe to take the log of.
fn open_unit(rng: &mut dyn RngCore) -> f64 {
    1.0 - rng.gen::<f64>()
}

fn standard_normal(rng: &mut dyn RngCore) -> f64 {
    let u1 = open_unit(rng);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn poisson_draw(mu: f64, rng: &mut dyn RngCore) -> i64 {
    if !(mu > 0.0) || !mu.is_finite() {
        return 0;
    }
    if mu < 30.0 {
        let limit = (-mu).exp();
        let mut k = 0;
        let mut p = open_unit(rng);
        while p > limit {
            k += 1;
            p *= open_unit(rng);
        }
        k
    } else {
        (mu + mu.sqrt() * standard_normal(rng)).round().max(0.0) as i64
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

impl LogDensity for Uniform {
    fn name(&self) -> &str {
        "Uniform"
    }

    fn parameters(&self) -> &[&str] {
        &["lower", "upper"]
    }

    fn logp(&self, value: &Value, params: &Params) -> Result<f64> {
        Ok(uniform_logp(value, params.real("lower")?, params.real("upper")?))
    }

    fn can_sample(&self) -> bool {
        true
    }

    fn sample(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Option<Result<Value>> {
        Some(self.draw(params, shape, rng))
    }
}

impl Uniform {
    fn draw(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Result<Value> {
        let lower = params.real("lower")?;
        let upper = params.real("upper")?;
        Ok(fill_real(shape, || lower + (upper - lower) * rng.gen::<f64>()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscreteUniform;

impl LogDensity for DiscreteUniform {
    fn name(&self) -> &str {
        "DiscreteUniform"
    }

    fn parameters(&self) -> &[&str] {
        &["lower", "upper"]
    }

    fn logp(&self, value: &Value, params: &Params) -> Result<f64> {
        Ok(discrete_uniform_logp(value, params.int("lower")?, params.int("upper")?))
    }

    fn can_sample(&self) -> bool {
        true
    }

    fn sample(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Option<Result<Value>> {
        Some(self.draw(params, shape, rng))
    }
}

impl DiscreteUniform {
    fn draw(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Result<Value> {
        let lower = params.int("lower")?;
        let upper = params.int("upper")?;
        if upper < lower {
            return Ok(fill_int(shape, || lower));
        }
        Ok(fill_int(shape, || rng.gen_range(lower..=upper)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Exponential;

impl LogDensity for Exponential {
    fn name(&self) -> &str {
        "Exponential"
    }

    fn parameters(&self) -> &[&str] {
        &["rate"]
    }

    fn logp(&self, value: &Value, params: &Params) -> Result<f64> {
        Ok(exponential_logp(value, params.real("rate")?))
    }

    fn can_sample(&self) -> bool {
        true
    }

    fn sample(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Option<Result<Value>> {
        Some(self.draw(params, shape, rng))
    }
}

impl Exponential {
    fn draw(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Result<Value> {
        let rate = params.real("rate")?;
        Ok(fill_real(shape, || {
            if rate > 0.0 {
                -open_unit(rng).ln() / rate
            } else {
                f64::NAN
            }
        }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Poisson;

impl LogDensity for Poisson {
    fn name(&self) -> &str {
        "Poisson"
    }

    fn parameters(&self) -> &[&str] {
        &["mu"]
    }

    fn logp(&self, value: &Value, params: &Params) -> Result<f64> {
        Ok(poisson_logp(value, params.real("mu")?))
    }

    fn can_sample(&self) -> bool {
        true
    }

    fn sample(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Option<Result<Value>> {
        Some(self.draw(params, shape, rng))
    }
}

impl Poisson {
    fn draw(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Result<Value> {
        let mu = params.real("mu")?;
        Ok(fill_int(shape, || poisson_draw(mu, rng)))
    }
}

/// Normal parameterized by mean and precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normal;

impl LogDensity for Normal {
    fn name(&self) -> &str {
        "Normal"
    }

    fn parameters(&self) -> &[&str] {
        &["mu", "tau"]
    }

    fn logp(&self, value: &Value, params: &Params) -> Result<f64> {
        Ok(normal_logp(value, params.real("mu")?, params.real("tau")?))
    }

    fn can_sample(&self) -> bool {
        true
    }

    fn sample(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Option<Result<Value>> {
        Some(self.draw(params, shape, rng))
    }
}

impl Normal {
    fn draw(&self, params: &Params, shape: Shape, rng: &mut dyn RngCore) -> Result<Value> {
        let mu = params.real("mu")?;
        let tau = params.real("tau")?;
        let sd = if tau > 0.0 { tau.sqrt().recip() } else { f64::NAN };
        Ok(fill_real(shape, || mu + sd * standard_normal(rng)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn uniform_support() {
        let v = Value::from(vec![1.0, 2.0, 3.0, 4.0]);
        assert!(close(uniform_logp(&v, 0.0, 5.0), -4.0 * 5.0_f64.ln()));
        assert_eq!(uniform_logp(&v, 1.5, 5.0), f64::NEG_INFINITY);
        assert_eq!(uniform_logp(&Value::Real(1.0), 2.0, 2.0), f64::NEG_INFINITY);
    }

    #[test]
    fn discrete_uniform_rejects_fractions() {
        assert!(close(discrete_uniform_logp(&Value::Int(50), 0, 110), -(111.0_f64).ln()));
        assert_eq!(discrete_uniform_logp(&Value::Real(2.5), 0, 10), f64::NEG_INFINITY);
    }

    #[test]
    fn exponential_values() {
        assert!(close(exponential_logp(&Value::Real(1.0), 1.0), -1.0));
        assert_eq!(exponential_logp(&Value::Real(-0.1), 1.0), f64::NEG_INFINITY);
        assert_eq!(exponential_logp(&Value::Real(1.0), 0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn poisson_values() {
        // P(k=2 | mu=3) = 9 e^-3 / 2
        let expected = (9.0_f64 / 2.0).ln() - 3.0;
        assert!(close(poisson_logp(&Value::Int(2), 3.0), expected));
        assert_eq!(poisson_logp(&Value::Real(-1.0), 1.0), f64::NEG_INFINITY);
        assert_eq!(poisson_logp(&Value::Int(0), 0.0), 0.0);
        assert_eq!(poisson_logp(&Value::Int(1), 0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn poisson_real_counts() {
        // Γ(1.5) = √π / 2
        let expected = -1.0 - (PI.sqrt() / 2.0).ln();
        assert!(close(poisson_logp(&Value::Real(0.5), 1.0), expected));

        // ln 20! through both branches
        let exact: f64 = (2..=20).map(|i| (i as f64).ln()).sum();
        assert!((ln_factorial(20.0) - exact).abs() < 1e-9);
        assert!(close(ln_factorial(5.0), 120.0_f64.ln()));
    }

    #[test]
    fn poisson_huge_count_is_cheap() {
        let logp = poisson_logp(&Value::Real(1e10), 1e10);
        assert!(logp.is_finite());
        assert!(logp < 0.0);
    }

    #[test]
    fn discrete_uniform_full_range() {
        let logp = discrete_uniform_logp(&Value::Int(0), i64::MIN, i64::MAX);
        assert!(close(logp, -(2.0_f64.powi(64)).ln()));

        let mut rng = StdRng::seed_from_u64(3);
        let params = Params::new().with("lower", i64::MIN).with("upper", i64::MAX);
        let v = DiscreteUniform.sample(&params, Shape::Scalar, &mut rng).unwrap().unwrap();
        assert!(DiscreteUniform.logp(&v, &params).unwrap().is_finite());
    }

    #[test]
    fn normal_at_mean() {
        let expected = 0.5 * (1.0 / (2.0 * PI)).ln();
        assert!(close(normal_logp(&Value::Real(0.0), 0.0, 1.0), expected));
    }

    #[test]
    fn samples_stay_in_support() {
        let mut rng = StdRng::seed_from_u64(11);
        let params = Params::new().with("lower", 0.9).with("upper", 2.0);
        for _ in 0..200 {
            let v = Uniform.sample(&params, Shape::Scalar, &mut rng).unwrap().unwrap();
            assert!(Uniform.logp(&v, &params).unwrap().is_finite());
        }

        let params = Params::new().with("lower", 0_i64).with("upper", 110_i64);
        let v = DiscreteUniform
            .sample(&params, Shape::Vector(50), &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(v.len(), 50);
        assert!(DiscreteUniform.logp(&v, &params).unwrap().is_finite());

        let params = Params::new().with("mu", 3.0);
        let v = Poisson.sample(&params, Shape::Vector(20), &mut rng).unwrap().unwrap();
        assert!(Poisson.logp(&v, &params).unwrap().is_finite());

        let params = Params::new().with("rate", 1.0);
        let v = Exponential.sample(&params, Shape::Scalar, &mut rng).unwrap().unwrap();
        assert!(Exponential.logp(&v, &params).unwrap().is_finite());
    }

    #[test]
    fn array_parameter_is_a_usage_error() {
        let params = Params::new().with("rate", vec![1.0, 2.0]);
        assert!(Exponential.logp(&Value::Real(1.0), &params).is_err());
    }
}
