//! Numerical integrator for f(x) = 1/ln(x)
//!
//! This is the numeric core of QuadNet. It has no knowledge of the network or
//! of task distribution; it evaluates the fixed integrand on one sub-interval
//! with a selected quadrature rule.
//!
//! The integrand is undefined at x = 1, so any interval whose closed hull
//! contains 1 is rejected before any quadrature runs.

use thiserror::Error;

/// Quadrature rule selection
///
/// The discriminants match the wire encoding of the task message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    /// Midpoint rectangles
    Midpoint = 1,
    /// Trapezoids
    Trapezoid = 2,
    /// Composite Simpson's rule (even step count, odd counts rounded down)
    Simpson = 3,
}

impl Method {
    /// Method name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Method::Midpoint => "midpoint",
            Method::Trapezoid => "trapezoid",
            Method::Simpson => "simpson",
        }
    }
}

/// Errors from numeric precondition checks
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrateError {
    /// An argument violates a precondition (e.g. non-positive step)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The closed interval contains x = 1, where 1/ln(x) is undefined
    #[error("integration interval [{lo}, {hi}] contains the singularity at x = 1")]
    SingularityInInterval { lo: f64, hi: f64 },
}

/// The integrand f(x) = 1/ln(x)
#[inline]
fn f(x: f64) -> f64 {
    1.0 / x.ln()
}

/// Check whether the closed hull of [a,b] contains the singularity at x = 1
fn contains_singularity(a: f64, b: f64) -> bool {
    let lo = a.min(b);
    let hi = a.max(b);
    lo <= 1.0 && 1.0 <= hi
}

/// Number of full steps of length h on [a,b] (floor)
fn steps_count(a: f64, b: f64, h: f64) -> u64 {
    ((b - a).abs() / h).floor() as u64
}

/// Integrate f(x) = 1/ln(x) on [a,b] with step h using the selected method.
///
/// `a` may be greater or less than `b`; the sign of the result follows the
/// direction of integration. Returns 0 immediately when `a == b`.
///
/// # Errors
///
/// - [`IntegrateError::InvalidArgument`] if `h` is not strictly positive
/// - [`IntegrateError::SingularityInInterval`] if [min(a,b), max(a,b)]
///   contains x = 1
pub fn integrate(a: f64, b: f64, h: f64, method: Method) -> Result<f64, IntegrateError> {
    if !(h > 0.0) {
        return Err(IntegrateError::InvalidArgument(format!(
            "step h must be > 0, got {h}"
        )));
    }
    if a == b {
        return Ok(0.0);
    }
    if contains_singularity(a, b) {
        return Err(IntegrateError::SingularityInInterval {
            lo: a.min(b),
            hi: a.max(b),
        });
    }

    let value = match method {
        Method::Midpoint => integrate_midpoint(a, b, h),
        Method::Trapezoid => integrate_trapezoid(a, b, h),
        Method::Simpson => integrate_simpson(a, b, h),
    };
    Ok(value)
}

fn integrate_midpoint(a: f64, b: f64, h: f64) -> f64 {
    let dir = if b > a { 1.0 } else { -1.0 };
    let n = steps_count(a, b, h);
    let step = dir * h;

    let mut sum = 0.0;
    let mut x = a;
    for _ in 0..n {
        sum += f(x + step * 0.5);
        x += step;
    }
    sum * step
}

fn integrate_trapezoid(a: f64, b: f64, h: f64) -> f64 {
    let dir = if b > a { 1.0 } else { -1.0 };
    let n = steps_count(a, b, h);
    let step = dir * h;

    if n == 0 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut x0 = a;
    for _ in 0..n {
        let x1 = x0 + step;
        sum += 0.5 * (f(x0) + f(x1));
        x0 = x1;
    }
    sum * step
}

fn integrate_simpson(a: f64, b: f64, h: f64) -> f64 {
    let dir = if b > a { 1.0 } else { -1.0 };
    let mut n = steps_count(a, b, h);

    if n < 2 {
        return integrate_trapezoid(a, b, h);
    }

    // Simpson needs an even step count; the fractional remainder past the
    // last even step is dropped, matching the documented behavior.
    if n % 2 == 1 {
        n -= 1;
    }

    let step = dir * h;

    let s0 = f(a);
    let mut s1 = 0.0;
    let mut s2 = 0.0;

    for i in 1..n {
        let x = a + (i as f64) * step;
        if i % 2 == 1 {
            s1 += f(x);
        } else {
            s2 += f(x);
        }
    }

    let xn = a + (n as f64) * step;
    let sn = f(xn);

    (step / 3.0) * (s0 + 4.0 * s1 + 2.0 * s2 + sn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_singularity() {
        let err = integrate(0.5, 2.0, 0.1, Method::Trapezoid).unwrap_err();
        assert!(matches!(err, IntegrateError::SingularityInInterval { .. }));
    }

    #[test]
    fn rejects_singularity_reversed_bounds() {
        let err = integrate(2.0, 0.5, 0.1, Method::Midpoint).unwrap_err();
        assert!(matches!(err, IntegrateError::SingularityInInterval { .. }));
    }

    #[test]
    fn rejects_singularity_at_endpoint() {
        let err = integrate(1.0, 3.0, 0.1, Method::Simpson).unwrap_err();
        assert!(matches!(err, IntegrateError::SingularityInInterval { .. }));
    }

    #[test]
    fn rejects_zero_step() {
        let err = integrate(2.0, 10.0, 0.0, Method::Simpson).unwrap_err();
        assert!(matches!(err, IntegrateError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_negative_step() {
        let err = integrate(2.0, 10.0, -1e-3, Method::Midpoint).unwrap_err();
        assert!(matches!(err, IntegrateError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_nan_step() {
        let err = integrate(2.0, 10.0, f64::NAN, Method::Trapezoid).unwrap_err();
        assert!(matches!(err, IntegrateError::InvalidArgument(_)));
    }

    #[test]
    fn empty_interval_is_zero() {
        for method in [Method::Midpoint, Method::Trapezoid, Method::Simpson] {
            assert_eq!(integrate(5.0, 5.0, 0.1, method).unwrap(), 0.0);
        }
    }

    #[test]
    fn reference_integral_simpson() {
        let v = integrate(2.0, 10.0, 1e-4, Method::Simpson).unwrap();
        assert!((v - 5.120435).abs() < 2e-3, "got {v}");
    }

    #[test]
    fn methods_agree_on_reference_interval() {
        let mid = integrate(2.0, 10.0, 1e-4, Method::Midpoint).unwrap();
        let trap = integrate(2.0, 10.0, 1e-4, Method::Trapezoid).unwrap();
        let simp = integrate(2.0, 10.0, 1e-4, Method::Simpson).unwrap();
        assert!((mid - simp).abs() < 1e-3, "midpoint {mid} vs simpson {simp}");
        assert!((trap - simp).abs() < 1e-3, "trapezoid {trap} vs simpson {simp}");
    }

    #[test]
    fn reversed_bounds_negate_the_integral() {
        let fwd = integrate(2.0, 10.0, 1e-3, Method::Trapezoid).unwrap();
        let rev = integrate(10.0, 2.0, 1e-3, Method::Trapezoid).unwrap();
        assert!((fwd + rev).abs() < 1e-6, "fwd {fwd}, rev {rev}");
    }

    #[test]
    fn simpson_falls_back_to_trapezoid_on_tiny_interval() {
        // One full step only: n = 1 < 2
        let simp = integrate(2.0, 2.15, 0.1, Method::Simpson).unwrap();
        let trap = integrate(2.0, 2.15, 0.1, Method::Trapezoid).unwrap();
        assert_eq!(simp, trap);
    }

    #[test]
    fn zero_steps_yield_zero() {
        // Interval shorter than one step
        assert_eq!(integrate(2.0, 2.05, 0.1, Method::Midpoint).unwrap(), 0.0);
        assert_eq!(integrate(2.0, 2.05, 0.1, Method::Trapezoid).unwrap(), 0.0);
    }
}
