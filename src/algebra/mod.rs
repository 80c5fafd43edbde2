// src/algebra/mod.rs

//! The algebraic state: the maintained inverse and determinant.
//!
//! Everything here works in *internal* coordinates. `W` is the inverse of the
//! internally ordered matrix `M_int[a][b] = f(xs[a], ys[b])`, stored in the
//! top-left `N x N` block of a `capacity x capacity` buffer. The logical
//! determinant is `det(M_int)` times the parity of the row and column
//! permutations, tracked as a single sign bit.
//!
//! Every update comes in two halves: a read-only `*_update`/`border` step that
//! computes the determinant ratio and caches the vectors the commit needs, and
//! a `commit_*` step that folds the cached quantities into `W` in O(N²).

use nalgebra::linalg::LU;
use nalgebra::{ComplexField, DMatrixView, Dyn};

use crate::kernel::{magnitudes, modulus, row_sum_norm, Matrix, PivotTolerance, Vector};
use crate::DetManipError;

/// Inverse buffer, determinant of the internal matrix and permutation sign.
#[derive(Debug, Clone)]
pub struct AlgebraicState<T: ComplexField> {
    inverse: Matrix<T>,
    det: T,
    negative: bool,
    size: usize,
}

/// Cached quantities of a bordering (block insertion) proposal.
///
/// For new rows `C` (k x N), new columns `B` (N x k) and corner `D` (k x k)
/// the Schur complement is `S = D - C W B` and the ratio is `det S`.
#[derive(Debug, Clone)]
pub struct Border<T: ComplexField> {
    wb: Matrix<T>,
    cw: Matrix<T>,
    schur_inv: Matrix<T>,
    schur_det: T,
}

impl<T: ComplexField> Border<T> {
    /// `det S`, the ratio of appending the block at the end.
    pub fn ratio(&self) -> T {
        self.schur_det.clone()
    }
}

/// Cached quantities of a single row replacement: `w = uᵀ W`.
#[derive(Debug, Clone)]
pub struct RowUpdate<T: ComplexField> {
    w: Vector<T>,
    ratio: T,
}

/// Cached quantities of a single column replacement: `q = W v`.
#[derive(Debug, Clone)]
pub struct ColUpdate<T: ComplexField> {
    q: Vector<T>,
    ratio: T,
}

/// Cached quantities of a combined row and column replacement (rank 2).
#[derive(Debug, Clone)]
pub struct CrossUpdate<T: ComplexField> {
    p: Vector<T>,
    q: Vector<T>,
    capacitance_inv: Matrix<T>,
    ratio: T,
}

/// A from-scratch inverse and determinant.
#[derive(Debug, Clone)]
pub struct Factorization<T: ComplexField> {
    inverse: Matrix<T>,
    det: T,
}

impl<T: ComplexField> Factorization<T> {
    /// Inverts `m` by LU decomposition.
    pub fn compute(m: Matrix<T>, tolerance: PivotTolerance, operation: &'static str) -> Result<Self, DetManipError> {
        let n = m.nrows();
        if n == 0 {
            return Ok(Factorization {
                inverse: Matrix::<T>::zeros(0, 0),
                det: T::one(),
            });
        }
        let scale = row_sum_norm(&magnitudes(&m));
        let lu = pivoted_lu(m, scale, tolerance, operation)?;
        let det = lu.determinant();
        let inverse = lu.try_inverse().ok_or(DetManipError::DegenerateMatrix {
            operation,
            modulus: 0.0,
        })?;
        Ok(Factorization { inverse, det })
    }

    pub fn det(&self) -> T {
        self.det.clone()
    }

    pub fn inverse(&self) -> &Matrix<T> {
        &self.inverse
    }
}

/// LU factorization of a pivot block, refused when its determinant fails the
/// absolute check or its smallest pivot is within `relative * scale` of zero.
pub fn pivoted_lu<T: ComplexField>(
    block: Matrix<T>,
    scale: f64,
    tolerance: PivotTolerance,
    operation: &'static str,
) -> Result<LU<T, Dyn, Dyn>, DetManipError> {
    let lu = block.lu();
    let det = lu.determinant();
    let smallest = lu
        .u()
        .diagonal()
        .iter()
        .map(|p| modulus(p.clone()))
        .fold(f64::INFINITY, f64::min);
    if tolerance.rejects_ratio(det.clone()) || tolerance.rejects_pivot(smallest, scale) {
        return Err(DetManipError::DegenerateMatrix {
            operation,
            modulus: modulus(det),
        });
    }
    Ok(lu)
}

impl<T: ComplexField> AlgebraicState<T> {
    /// Empty state (`N = 0`, determinant 1) with a `capacity x capacity` buffer.
    pub fn new(capacity: usize) -> Self {
        AlgebraicState {
            inverse: Matrix::<T>::zeros(capacity, capacity),
            det: T::one(),
            negative: false,
            size: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.inverse.nrows()
    }

    /// Copies the live block into a larger buffer.
    pub fn grow(&mut self, capacity: usize) {
        if capacity <= self.capacity() {
            return;
        }
        let n = self.size;
        let mut bigger = Matrix::<T>::zeros(capacity, capacity);
        bigger.view_mut((0, 0), (n, n)).copy_from(&self.live());
        self.inverse = bigger;
    }

    /// The live `N x N` block of `W`.
    pub fn live(&self) -> DMatrixView<'_, T> {
        self.inverse.view((0, 0), (self.size, self.size))
    }

    /// `W[r][c]` in internal coordinates.
    pub fn entry(&self, r: usize, c: usize) -> T {
        self.inverse[(r, c)].clone()
    }

    /// Logical determinant.
    pub fn determinant(&self) -> T {
        if self.negative {
            -self.det.clone()
        } else {
            self.det.clone()
        }
    }

    /// Flips the sign bit `parity` times.
    pub fn flip_sign(&mut self, parity: usize) {
        self.negative ^= parity % 2 == 1;
    }

    /// Back to the empty state, keeping the buffer.
    pub fn clear(&mut self) {
        self.det = T::one();
        self.negative = false;
        self.size = 0;
    }

    /// Largest entry-wise modulus difference between the live block and `other`.
    pub fn deviation(&self, other: &Matrix<T>) -> f64 {
        self.live()
            .iter()
            .zip(other.iter())
            .map(|(a, b)| modulus(a.clone() - b.clone()))
            .fold(0.0, f64::max)
    }

    /// Replaces the live block with a fresh factorization. The sign bit is
    /// kept; callers that also reset the permutations call [`Self::reset_sign`].
    pub fn install(&mut self, fresh: Factorization<T>) {
        let n = fresh.inverse.nrows();
        self.grow(n);
        self.inverse.view_mut((0, 0), (n, n)).copy_from(&fresh.inverse);
        self.det = fresh.det;
        self.size = n;
    }

    pub fn reset_sign(&mut self) {
        self.negative = false;
    }

    // --- Block insertion (bordering method) ---

    /// Schur complement of appending columns `b` (N x k), rows `c` (k x N)
    /// and corner `d` (k x k). Its pivots are measured against
    /// `|D| + |C| |W| |B|`.
    pub fn border(
        &self,
        b: &Matrix<T>,
        c: &Matrix<T>,
        d: Matrix<T>,
        tolerance: PivotTolerance,
        operation: &'static str,
    ) -> Result<Border<T>, DetManipError> {
        let w = self.live();
        let wb = &w * b;
        let cw = c * &w;
        let terms = magnitudes(&d) + magnitudes(c) * (w.map(modulus) * magnitudes(b));
        let schur = d - &cw * b;
        let lu = pivoted_lu(schur, row_sum_norm(&terms), tolerance, operation)?;
        let schur_det = lu.determinant();
        let schur_inv = lu.try_inverse().ok_or(DetManipError::DegenerateMatrix {
            operation,
            modulus: 0.0,
        })?;
        Ok(Border {
            wb,
            cw,
            schur_inv,
            schur_det,
        })
    }

    /// Appends the bordered block at internal slots `N..N+k`.
    /// The buffer must already hold `N + k` rows.
    pub fn commit_border(&mut self, border: Border<T>) {
        let n = self.size;
        let k = border.schur_inv.nrows();
        debug_assert!(n + k <= self.capacity());

        let wbs = &border.wb * &border.schur_inv;
        let scw = &border.schur_inv * &border.cw;
        self.inverse
            .view_mut((0, 0), (n, n))
            .gemm(T::one(), &wbs, &border.cw, T::one());
        self.inverse.view_mut((0, n), (n, k)).copy_from(&(-wbs));
        self.inverse.view_mut((n, 0), (k, n)).copy_from(&(-scw));
        self.inverse.view_mut((n, n), (k, k)).copy_from(&border.schur_inv);

        self.det = self.det.clone() * border.schur_det;
        self.size = n + k;
    }

    // --- Block removal ---

    /// `W[cols[p]][rows[q]]`: the block of the inverse that decides the
    /// ratio of removing internal `rows` and `cols`.
    pub fn minor(&self, cols: &[usize], rows: &[usize]) -> Matrix<T> {
        Matrix::<T>::from_fn(cols.len(), rows.len(), |p, q| self.entry(cols[p], rows[q]))
    }

    /// Determinant of [`Self::minor`], refused when the block is numerically
    /// singular against the full rows of `W` it is cut from.
    pub fn minor_determinant(
        &self,
        cols: &[usize],
        rows: &[usize],
        tolerance: PivotTolerance,
        operation: &'static str,
    ) -> Result<T, DetManipError> {
        let n = self.size;
        let scale = cols
            .iter()
            .map(|&r| (0..n).map(|c| modulus(self.entry(r, c))).sum::<f64>())
            .fold(0.0, f64::max);
        let lu = pivoted_lu(self.minor(cols, rows), scale, tolerance, operation)?;
        Ok(lu.determinant())
    }

    /// Exchanges internal row slots: swaps the matching columns of `W`.
    pub fn swap_row_slots(&mut self, a: usize, b: usize) {
        if a != b {
            self.inverse.swap_columns(a, b);
            self.det = -self.det.clone();
        }
    }

    /// Exchanges internal column slots: swaps the matching rows of `W`.
    pub fn swap_col_slots(&mut self, a: usize, b: usize) {
        if a != b {
            self.inverse.swap_rows(a, b);
            self.det = -self.det.clone();
        }
    }

    /// Drops the last `k` internal rows and columns:
    /// `W' = W11 - W12 W22⁻¹ W21`, `det' = det · det W22`.
    pub fn commit_removal(&mut self, k: usize, operation: &'static str) -> Result<(), DetManipError> {
        let n = self.size;
        let m = n - k;
        let w22 = self.inverse.view((m, m), (k, k)).clone_owned();
        let det22 = w22.determinant();
        let inv22 = w22.try_inverse().ok_or(DetManipError::DegenerateMatrix {
            operation,
            modulus: modulus(det22.clone()),
        })?;
        let w12 = self.inverse.view((0, m), (m, k)).clone_owned();
        let w21 = self.inverse.view((m, 0), (k, m)).clone_owned();
        let t = w12 * inv22;
        self.inverse
            .view_mut((0, 0), (m, m))
            .gemm(-T::one(), &t, &w21, T::one());

        self.det = self.det.clone() * det22;
        self.size = m;
        Ok(())
    }

    // --- In-place replacements (Sherman-Morrison / Woodbury) ---

    /// Ratio of replacing internal row `a` with `u`: `(uᵀ W)[a]`.
    pub fn row_update(
        &self,
        a: usize,
        u: &Vector<T>,
        tolerance: PivotTolerance,
        operation: &'static str,
    ) -> Result<RowUpdate<T>, DetManipError> {
        let w = self.live().tr_mul(u);
        let ratio = w[a].clone();
        let scale: f64 = u.iter().enumerate().map(|(c, e)| modulus(e.clone()) * modulus(self.entry(c, a))).sum();
        if tolerance.rejects(ratio.clone(), scale) {
            return Err(DetManipError::DegenerateMatrix {
                operation,
                modulus: modulus(ratio),
            });
        }
        Ok(RowUpdate { w, ratio })
    }

    /// `W' = W - W[:, a] (w - e_a)ᵀ / ratio`.
    pub fn commit_row(&mut self, a: usize, update: RowUpdate<T>) {
        let n = self.size;
        let col_a = Vector::<T>::from_fn(n, |r, _| self.entry(r, a));
        let mut v = update.w;
        v[a] -= T::one();
        self.inverse
            .view_mut((0, 0), (n, n))
            .ger(-T::one() / update.ratio.clone(), &col_a, &v, T::one());
        self.det = self.det.clone() * update.ratio;
    }

    /// Ratio of replacing internal column `b` with `v`: `(W v)[b]`.
    pub fn col_update(
        &self,
        b: usize,
        v: &Vector<T>,
        tolerance: PivotTolerance,
        operation: &'static str,
    ) -> Result<ColUpdate<T>, DetManipError> {
        let q = &self.live() * v;
        let ratio = q[b].clone();
        let scale: f64 = v.iter().enumerate().map(|(r, e)| modulus(self.entry(b, r)) * modulus(e.clone())).sum();
        if tolerance.rejects(ratio.clone(), scale) {
            return Err(DetManipError::DegenerateMatrix {
                operation,
                modulus: modulus(ratio),
            });
        }
        Ok(ColUpdate { q, ratio })
    }

    /// `W' = W - (q - e_b) W[b, :] / ratio`.
    pub fn commit_col(&mut self, b: usize, update: ColUpdate<T>) {
        let n = self.size;
        let row_b = Vector::<T>::from_fn(n, |c, _| self.entry(b, c));
        let mut q = update.q;
        q[b] -= T::one();
        self.inverse
            .view_mut((0, 0), (n, n))
            .ger(-T::one() / update.ratio.clone(), &q, &row_b, T::one());
        self.det = self.det.clone() * update.ratio;
    }

    /// Ratio of replacing internal row `a` and column `b` at once.
    ///
    /// `nrow` is the new row (its entry `b` is the new corner `f(x, y)`),
    /// `ncol` the new column with entry `a` left at the *old* corner value.
    /// With `p = nrowᵀ W` and `q = W ncol` the Woodbury capacitance is
    /// `K = [[p[a], nrow·q - f(x, y)], [W[b][a], q[b]]]` and the ratio `det K`.
    #[allow(clippy::too_many_arguments)]
    pub fn cross_update(
        &self,
        a: usize,
        b: usize,
        nrow: &Vector<T>,
        ncol: &Vector<T>,
        corner: T,
        tolerance: PivotTolerance,
        operation: &'static str,
    ) -> Result<CrossUpdate<T>, DetManipError> {
        let w = self.live();
        let p = w.tr_mul(nrow);
        let q = &w * ncol;
        let k01 = nrow.dot(&q) - corner.clone();
        let capacitance = Matrix::<T>::from_row_slice(
            2,
            2,
            &[p[a].clone(), k01, self.entry(b, a), q[b].clone()],
        );

        // The same entries built from moduli, without cancellation.
        let w_abs = w.map(modulus);
        let (row_abs, col_abs) = (nrow.map(modulus), ncol.map(modulus));
        let p_abs = w_abs.tr_mul(&row_abs);
        let q_abs = &w_abs * &col_abs;
        let terms = Matrix::<f64>::from_row_slice(
            2,
            2,
            &[
                p_abs[a],
                row_abs.dot(&q_abs) + modulus(corner),
                w_abs[(b, a)],
                q_abs[b],
            ],
        );

        let lu = pivoted_lu(capacitance, row_sum_norm(&terms), tolerance, operation)?;
        let ratio = lu.determinant();
        let capacitance_inv = lu.try_inverse().ok_or(DetManipError::DegenerateMatrix {
            operation,
            modulus: 0.0,
        })?;
        Ok(CrossUpdate {
            p,
            q,
            capacitance_inv,
            ratio,
        })
    }

    /// `W' = W - [W[:, a], q - e_b] K⁻¹ [p - e_a; W[b, :]]`.
    pub fn commit_cross(&mut self, a: usize, b: usize, update: CrossUpdate<T>) {
        let n = self.size;
        let left = Matrix::<T>::from_fn(n, 2, |r, c| match c {
            0 => self.entry(r, a),
            _ if r == b => update.q[r].clone() - T::one(),
            _ => update.q[r].clone(),
        });
        let right = Matrix::<T>::from_fn(2, n, |r, c| match r {
            0 if c == a => update.p[c].clone() - T::one(),
            0 => update.p[c].clone(),
            _ => self.entry(b, c),
        });
        let left = left * update.capacitance_inv;
        self.inverse
            .view_mut((0, 0), (n, n))
            .gemm(-T::one(), &left, &right, T::one());
        self.det = self.det.clone() * update.ratio;
    }
}

impl<T: ComplexField> RowUpdate<T> {
    pub fn ratio(&self) -> T {
        self.ratio.clone()
    }
}

impl<T: ComplexField> ColUpdate<T> {
    pub fn ratio(&self) -> T {
        self.ratio.clone()
    }
}

impl<T: ComplexField> CrossUpdate<T> {
    pub fn ratio(&self) -> T {
        self.ratio.clone()
    }
}
