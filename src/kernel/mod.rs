// src/kernel/mod.rs

//! The numerical kernel of the determinant engine.
//! This module provides the kernel capability that turns a pair of arguments
//! into a matrix entry, the dense type aliases, and a few concrete kernels.

use nalgebra::{Complex, ComplexField, DMatrix, DVector};

// Type aliases for clarity throughout the engine.
pub type Matrix<T = f64> = DMatrix<T>;
pub type Vector<T = f64> = DVector<T>;

/// The common interface for every function that generates matrix entries.
///
/// The entry at logical position `(i, j)` is always
/// `evaluate(row_arg(i), col_arg(j))`. Implementations must be pure and
/// deterministic: the engine re-evaluates entries whenever it needs them
/// and never caches the dense matrix.
pub trait Kernel<X, Y> {
    /// The matrix element type (`f64`, `Complex<f64>`, ...).
    type Scalar: ComplexField;

    /// Evaluates the kernel on one row argument and one column argument.
    fn evaluate(&self, x: &X, y: &Y) -> Self::Scalar;
}

impl<X, Y, T, F> Kernel<X, Y> for F
where
    F: Fn(&X, &Y) -> T,
    T: ComplexField,
{
    type Scalar = T;

    fn evaluate(&self, x: &X, y: &Y) -> T {
        self(x, y)
    }
}

/// Builds the dense matrix `f(xs[i], ys[j])`.
///
/// Only used on verification paths and by full regenerations.
pub fn dense_matrix<'a, X: 'a, Y: 'a, K>(
    kernel: &K,
    xs: impl IntoIterator<Item = &'a X>,
    ys: impl IntoIterator<Item = &'a Y>,
) -> Matrix<K::Scalar>
where
    K: Kernel<X, Y>,
{
    let rows: Vec<&X> = xs.into_iter().collect();
    let cols: Vec<&Y> = ys.into_iter().collect();
    Matrix::<K::Scalar>::from_fn(rows.len(), cols.len(), |i, j| kernel.evaluate(rows[i], cols[j]))
}

/// Modulus of a scalar as `f64`; `NaN` if the conversion is impossible.
pub fn modulus<T: ComplexField>(value: T) -> f64 {
    nalgebra::try_convert::<T::RealField, f64>(value.modulus()).unwrap_or(f64::NAN)
}

/// When a pivot is too small to divide by.
///
/// `absolute` bounds the modulus of a determinant ratio from below.
/// `relative` bounds a pivot against `scale`, the magnitude of the terms it
/// was computed from: a pivot that cancels down to rounding noise of those
/// terms is refused even when it is not exactly zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotTolerance {
    pub absolute: f64,
    pub relative: f64,
}

impl PivotTolerance {
    /// Refuses only zero or non-finite pivots.
    pub const EXACT: PivotTolerance = PivotTolerance {
        absolute: 0.0,
        relative: 0.0,
    };

    /// `true` when `ratio` is not finite or not above `absolute`.
    pub fn rejects_ratio<T: ComplexField>(&self, ratio: T) -> bool {
        let m = modulus(ratio);
        !(m.is_finite() && m > self.absolute)
    }

    /// `true` when `pivot` is not finite or not above `relative * scale`.
    pub fn rejects_pivot<T: ComplexField>(&self, pivot: T, scale: f64) -> bool {
        let m = modulus(pivot);
        !(m.is_finite() && m > 0.0 && m > self.relative * scale)
    }

    /// Both checks on a scalar pivot that is also the ratio.
    pub fn rejects<T: ComplexField>(&self, pivot: T, scale: f64) -> bool {
        self.rejects_ratio(pivot.clone()) || self.rejects_pivot(pivot, scale)
    }
}

/// Entry-wise modulus of a matrix.
pub fn magnitudes<T: ComplexField>(m: &Matrix<T>) -> Matrix<f64> {
    m.map(modulus)
}

/// Largest row sum of a non-negative matrix (its infinity norm).
pub fn row_sum_norm(m: &Matrix<f64>) -> f64 {
    m.row_iter().map(|row| row.sum()).fold(0.0, f64::max)
}

/// `(-1)^parity` as a scalar.
pub fn parity_sign<T: ComplexField>(parity: usize) -> T {
    if parity % 2 == 0 {
        T::one()
    } else {
        -T::one()
    }
}

/// `f(x, y) = exp(-(x - y))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialKernel;

impl Kernel<f64, f64> for ExponentialKernel {
    type Scalar = f64;

    fn evaluate(&self, x: &f64, y: &f64) -> f64 {
        (-(x - y)).exp()
    }
}

/// A smooth antiperiodic imaginary-time propagator.
///
/// For `tau = x - y` folded into `(0, beta]` the entry is
/// `-2 (pi / beta) / sin(pi r)` with `r = epsilon + tau / beta (1 - 2 epsilon)`.
/// The `epsilon` shift keeps the sine away from its zeros.
#[derive(Debug, Clone, Copy)]
pub struct PropagatorKernel {
    pub beta: f64,
    pub epsilon: f64,
}

impl Default for PropagatorKernel {
    fn default() -> Self {
        Self {
            beta: 10.0,
            epsilon: 0.1,
        }
    }
}

impl Kernel<f64, f64> for PropagatorKernel {
    type Scalar = f64;

    fn evaluate(&self, x: &f64, y: &f64) -> f64 {
        let pi = std::f64::consts::PI;
        let mut tau = x - y;
        if tau <= 0.0 {
            tau += self.beta;
        }
        let r = self.epsilon + tau / self.beta * (1.0 - 2.0 * self.epsilon);
        -2.0 * (pi / self.beta) / (pi * r).sin()
    }
}

/// Complex kernel `exp(-|x - y|) * exp(i * omega * (x - y))`.
#[derive(Debug, Clone, Copy)]
pub struct PhaseKernel {
    pub omega: f64,
}

impl Kernel<f64, f64> for PhaseKernel {
    type Scalar = Complex<f64>;

    fn evaluate(&self, x: &f64, y: &f64) -> Complex<f64> {
        let d = x - y;
        let (r, theta) = ((-d.abs()).exp(), self.omega * d);
        Complex::new(r * theta.cos(), r * theta.sin())
    }
}
