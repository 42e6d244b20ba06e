//! Crash growth curve and its inverse
//!
//! The multiplier grows as `y = a·x⁶ + b·x⁴ + c·x³ + d·x² + e·x + f` with `x`
//! in seconds since takeoff. The curve is strictly increasing for `x >= 0`, so
//! every crash multiplier maps to exactly one flight duration.

use crate::errors::SolverError;

const A: f64 = 1e-8;
const B: f64 = 2e-6;
const C: f64 = 2e-4;
const D: f64 = 4e-3;
const E: f64 = 6e-2;
const F: f64 = 1.0;

const MAX_ITERATIONS: usize = 50;
const TOLERANCE: f64 = 1e-6;

/// Multiplier reached `x` seconds into the flight
pub fn multiplier_at(x: f64) -> f64 {
    let x = x.max(0.0);
    let x2 = x * x;
    let x3 = x2 * x;
    let x4 = x3 * x;
    let x6 = x4 * x2;
    A * x6 + B * x4 + C * x3 + D * x2 + E * x + F
}

fn derivative_at(x: f64) -> f64 {
    let x2 = x * x;
    let x3 = x2 * x;
    let x5 = x3 * x2;
    6.0 * A * x5 + 4.0 * B * x3 + 3.0 * C * x2 + 2.0 * D * x + E
}

fn initial_guess(target: f64) -> f64 {
    if target < 10.0 {
        10.0
    } else if target < 1_000.0 {
        60.0
    } else {
        (target / A).powf(1.0 / 6.0)
    }
}

/// Seconds of flight needed to reach `target`, via Newton's method
pub fn solve_duration(target: f64) -> Result<f64, SolverError> {
    if target <= F {
        return Ok(0.0);
    }

    let mut x = initial_guess(target);
    for _ in 0..MAX_ITERATIONS {
        let slope = derivative_at(x);
        if slope == 0.0 {
            return Err(SolverError::ZeroDerivative { x });
        }
        let step = (multiplier_at(x) - target) / slope;
        x -= step;
        if x < 0.0 {
            x = 0.0;
        }
        if step.abs() < TOLERANCE {
            return Ok(x);
        }
    }

    Err(SolverError::NoConvergence {
        target,
        iterations: MAX_ITERATIONS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_starts_at_one_and_grows() {
        assert_eq!(multiplier_at(0.0), 1.0);
        let mut last = 1.0;
        for step in 1..400 {
            let y = multiplier_at(step as f64 * 0.5);
            assert!(y > last);
            last = y;
        }
    }

    #[test]
    fn test_known_points() {
        assert!((multiplier_at(10.0) - 2.23).abs() < 1e-9);
        assert!((multiplier_at(30.0) - 20.71).abs() < 1e-9);
    }

    #[test]
    fn test_solver_inverts_curve() {
        for target in [1.01, 1.5, 2.0, 9.99, 10.0, 57.3, 999.0, 1_000.0, 25_000.0, 4_252_017_623.04] {
            let x = solve_duration(target).unwrap();
            let back = multiplier_at(x);
            assert!(((back - target) / target).abs() < 1e-7, "target {} got {}", target, back);
        }
    }

    #[test]
    fn test_solver_floor() {
        assert_eq!(solve_duration(1.0).unwrap(), 0.0);
        assert_eq!(solve_duration(0.5).unwrap(), 0.0);
    }
}
