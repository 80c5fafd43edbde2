// src/engine/mod.rs

//! The transaction controller: the `DetManip` facade.
//!
//! Each edit is proposed with a `try_*` call, which validates the indices,
//! computes the determinant ratio and caches everything the commit needs.
//! At most one proposal is pending at any time. `complete_operation` folds
//! it into the argument store and the algebraic state, `reject_last_try`
//! drops it without touching either.

use nalgebra::ComplexField;
use tracing::{debug, error, trace, warn};

use crate::algebra::{AlgebraicState, Border, ColUpdate, CrossUpdate, Factorization, RowUpdate};
use crate::kernel::{dense_matrix, modulus, parity_sign, Kernel, Matrix, PivotTolerance, Vector};
use crate::provenance::CommitJournal;
use crate::store::ArgumentStore;
use crate::{DetManipConfig, DetManipError};

/// New rows and columns at their final logical positions, plus the bordering cache.
struct BlockInsert<X, Y, T: ComplexField> {
    rows: Vec<(usize, X)>,
    cols: Vec<(usize, Y)>,
    border: Border<T>,
}

/// Logical rows and columns to delete.
struct BlockRemove {
    rows: Vec<usize>,
    cols: Vec<usize>,
}

/// The edit waiting for a commit or a rollback.
enum Proposal<X, Y, T: ComplexField> {
    Insert(BlockInsert<X, Y, T>),
    Insert2(BlockInsert<X, Y, T>),
    InsertK(BlockInsert<X, Y, T>),
    Remove(BlockRemove),
    Remove2(BlockRemove),
    RemoveK(BlockRemove),
    ChangeRow {
        i: usize,
        x: X,
        update: RowUpdate<T>,
    },
    ChangeCol {
        j: usize,
        y: Y,
        update: ColUpdate<T>,
    },
    ChangeRowCol {
        i: usize,
        j: usize,
        x: X,
        y: Y,
        update: CrossUpdate<T>,
    },
    Refill {
        xs: Vec<X>,
        ys: Vec<Y>,
        fresh: Factorization<T>,
    },
}

impl<X, Y, T: ComplexField> Proposal<X, Y, T> {
    fn operation(&self) -> &'static str {
        match self {
            Proposal::Insert(_) => "insert",
            Proposal::Insert2(_) => "insert2",
            Proposal::InsertK(_) => "insert_k",
            Proposal::Remove(_) => "remove",
            Proposal::Remove2(_) => "remove2",
            Proposal::RemoveK(_) => "remove_k",
            Proposal::ChangeRow { .. } => "change_row",
            Proposal::ChangeCol { .. } => "change_col",
            Proposal::ChangeRowCol { .. } => "change_row_col",
            Proposal::Refill { .. } => "refill",
        }
    }
}

enum Transaction<X, Y, T: ComplexField> {
    Committed,
    Proposed { proposal: Proposal<X, Y, T>, ratio: T },
}

/// How far the maintained state is from a from-scratch recomputation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsistencyReport {
    /// Largest entry of `|M · M⁻¹ - I|`.
    pub inverse_residual: f64,
    /// `|det - det(M)| / |det(M)|` with `det(M)` from an LU decomposition.
    pub determinant_error: f64,
}

impl ConsistencyReport {
    pub fn is_within(&self, tolerance: f64) -> bool {
        self.inverse_residual <= tolerance && self.determinant_error <= tolerance
    }
}

/// Incrementally maintained inverse and determinant of `M[i][j] = f(x_i, y_j)`.
pub struct DetManip<X, Y, K: Kernel<X, Y>> {
    kernel: K,
    store: ArgumentStore<X, Y>,
    algebra: AlgebraicState<K::Scalar>,
    transaction: Transaction<X, Y, K::Scalar>,
    config: DetManipConfig,
    commits_since_check: usize,
    journal: Option<CommitJournal>,
}

fn invalid(operation: &'static str, detail: String) -> DetManipError {
    DetManipError::InvalidIndices { operation, detail }
}

/// Every position must be below `bound` and no two may coincide.
fn check_positions(operation: &'static str, what: &str, positions: &[usize], bound: usize) -> Result<(), DetManipError> {
    for (t, &p) in positions.iter().enumerate() {
        if p >= bound {
            return Err(invalid(operation, format!("{} index {} must be below {}", what, p, bound)));
        }
        if positions[..t].contains(&p) {
            return Err(invalid(operation, format!("{} index {} appears twice", what, p)));
        }
    }
    Ok(())
}

impl<X, Y, K: Kernel<X, Y>> DetManip<X, Y, K> {
    /// Empty engine (`N = 0`, determinant 1) with default settings.
    pub fn new(kernel: K, initial_capacity: usize) -> Self {
        Self::build(
            kernel,
            DetManipConfig {
                initial_capacity,
                ..DetManipConfig::default()
            },
        )
    }

    /// Empty engine with explicit settings.
    pub fn with_config(kernel: K, config: DetManipConfig) -> Result<Self, DetManipError> {
        config.validate()?;
        Ok(Self::build(kernel, config))
    }

    /// Engine holding the matrix `f(xs[i], ys[j])`, factorized from scratch.
    pub fn from_args(kernel: K, xs: Vec<X>, ys: Vec<Y>, config: DetManipConfig) -> Result<Self, DetManipError> {
        let mut engine = Self::with_config(kernel, config)?;
        engine.refill(xs, ys)?;
        Ok(engine)
    }

    fn build(kernel: K, config: DetManipConfig) -> Self {
        DetManip {
            kernel,
            store: ArgumentStore::new(config.initial_capacity),
            algebra: AlgebraicState::new(config.initial_capacity),
            transaction: Transaction::Committed,
            config,
            commits_since_check: 0,
            journal: None,
        }
    }

    // --- Read accessors ---

    /// Current dimension N.
    pub fn size(&self) -> usize {
        self.store.size()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Determinant of the committed matrix, O(1).
    pub fn determinant(&self) -> K::Scalar {
        self.algebra.determinant()
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn config(&self) -> &DetManipConfig {
        &self.config
    }

    /// `true` while a proposal waits for a commit or a rollback.
    pub fn is_pending(&self) -> bool {
        matches!(self.transaction, Transaction::Proposed { .. })
    }

    /// Name and ratio of the pending proposal, if any.
    pub fn pending(&self) -> Option<(&'static str, K::Scalar)> {
        match &self.transaction {
            Transaction::Committed => None,
            Transaction::Proposed { proposal, ratio } => Some((proposal.operation(), ratio.clone())),
        }
    }

    pub fn row_arg(&self, i: usize) -> Result<&X, DetManipError> {
        self.store.row_arg(i)
    }

    pub fn col_arg(&self, j: usize) -> Result<&Y, DetManipError> {
        self.store.col_arg(j)
    }

    /// Row arguments in logical order.
    pub fn row_args(&self) -> impl ExactSizeIterator<Item = &X> + '_ {
        self.store.row_args()
    }

    /// Column arguments in logical order.
    pub fn col_args(&self) -> impl ExactSizeIterator<Item = &Y> + '_ {
        self.store.col_args()
    }

    /// `f(row_arg(i), col_arg(j))`.
    pub fn evaluate(&self, i: usize, j: usize) -> Result<K::Scalar, DetManipError> {
        self.store.evaluate(&self.kernel, i, j)
    }

    /// The committed matrix, re-evaluated through the kernel. O(N²).
    pub fn matrix(&self) -> Matrix<K::Scalar> {
        dense_matrix(&self.kernel, self.store.row_args(), self.store.col_args())
    }

    /// The maintained inverse in logical order. O(N²).
    pub fn inverse_matrix(&self) -> Matrix<K::Scalar> {
        let n = self.size();
        Matrix::<K::Scalar>::from_fn(n, n, |r, c| {
            self.algebra.entry(self.store.col_slot(r), self.store.row_slot(c))
        })
    }

    /// One entry `(M⁻¹)[r][c]` of the maintained inverse. O(1).
    pub fn inverse_entry(&self, r: usize, c: usize) -> Result<K::Scalar, DetManipError> {
        let n = self.size();
        for index in [r, c] {
            if index >= n {
                return Err(DetManipError::IndexOutOfRange { index, size: n });
            }
        }
        Ok(self.algebra.entry(self.store.col_slot(r), self.store.row_slot(c)))
    }

    // --- Proposals ---

    fn ensure_idle(&self) -> Result<(), DetManipError> {
        if self.is_pending() {
            return Err(DetManipError::OperationAlreadyPending);
        }
        Ok(())
    }

    fn propose(&mut self, proposal: Proposal<X, Y, K::Scalar>, ratio: K::Scalar) -> K::Scalar {
        trace!(operation = proposal.operation(), size = self.size(), ratio = %ratio, "proposed");
        self.transaction = Transaction::Proposed {
            proposal,
            ratio: ratio.clone(),
        };
        ratio
    }

    /// Ratio of inserting row `x` at logical position `i` and column `y` at
    /// logical position `j` (`0 <= i, j <= N`).
    pub fn try_insert(&mut self, i: usize, j: usize, x: X, y: Y) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        let bound = self.size() + 1;
        check_positions("insert", "row", &[i], bound)?;
        check_positions("insert", "column", &[j], bound)?;
        self.propose_insert("insert", vec![(i, x)], vec![(j, y)], Proposal::Insert)
    }

    /// Ratio of inserting two rows and two columns at once. `i0, i1, j0, j1`
    /// are the positions in the final `(N+2) x (N+2)` matrix; `i0 != i1` and
    /// `j0 != j1`.
    #[allow(clippy::too_many_arguments)]
    pub fn try_insert2(
        &mut self,
        i0: usize,
        i1: usize,
        j0: usize,
        j1: usize,
        x0: X,
        x1: X,
        y0: Y,
        y1: Y,
    ) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        let bound = self.size() + 2;
        check_positions("insert2", "row", &[i0, i1], bound)?;
        check_positions("insert2", "column", &[j0, j1], bound)?;
        self.propose_insert("insert2", vec![(i0, x0), (i1, x1)], vec![(j0, y0), (j1, y1)], Proposal::Insert2)
    }

    /// Ratio of inserting `k = rows.len()` rows and columns at once, each
    /// given with its final logical position.
    pub fn try_insert_k(&mut self, rows: Vec<(usize, X)>, cols: Vec<(usize, Y)>) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        if rows.is_empty() || rows.len() != cols.len() {
            return Err(invalid(
                "insert_k",
                format!("{} rows and {} columns", rows.len(), cols.len()),
            ));
        }
        let bound = self.size() + rows.len();
        let row_pos: Vec<usize> = rows.iter().map(|(p, _)| *p).collect();
        let col_pos: Vec<usize> = cols.iter().map(|(p, _)| *p).collect();
        check_positions("insert_k", "row", &row_pos, bound)?;
        check_positions("insert_k", "column", &col_pos, bound)?;
        self.propose_insert("insert_k", rows, cols, Proposal::InsertK)
    }

    fn propose_insert(
        &mut self,
        operation: &'static str,
        rows: Vec<(usize, X)>,
        cols: Vec<(usize, Y)>,
        wrap: fn(BlockInsert<X, Y, K::Scalar>) -> Proposal<X, Y, K::Scalar>,
    ) -> Result<K::Scalar, DetManipError> {
        let n = self.size();
        let k = rows.len();
        let xs = self.store.internal_rows();
        let ys = self.store.internal_cols();
        let f = &self.kernel;

        // 1. Border: new columns against old rows, new rows against old columns, corner.
        let b = Matrix::<K::Scalar>::from_fn(n, k, |r, t| f.evaluate(&xs[r], &cols[t].1));
        let c = Matrix::<K::Scalar>::from_fn(k, n, |t, col| f.evaluate(&rows[t].1, &ys[col]));
        let d = Matrix::<K::Scalar>::from_fn(k, k, |t, u| f.evaluate(&rows[t].1, &cols[u].1));
        let border = self
            .algebra
            .border(&b, &c, d, self.config.pivot_tolerance(), operation)?;

        // 2. Sign of moving the appended block to its final positions.
        let row_pos: Vec<usize> = rows.iter().map(|(p, _)| *p).collect();
        let col_pos: Vec<usize> = cols.iter().map(|(p, _)| *p).collect();
        let parity = ArgumentStore::<X, Y>::insertion_parity(&row_pos, n)
            + ArgumentStore::<X, Y>::insertion_parity(&col_pos, n);
        let ratio = border.ratio() * parity_sign(parity);

        Ok(self.propose(wrap(BlockInsert { rows, cols, border }), ratio))
    }

    /// Ratio of removing logical row `i` and column `j` (`i, j < N`).
    pub fn try_remove(&mut self, i: usize, j: usize) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        let n = self.size();
        check_positions("remove", "row", &[i], n)?;
        check_positions("remove", "column", &[j], n)?;
        self.propose_remove("remove", vec![i], vec![j], Proposal::Remove)
    }

    /// Ratio of removing rows `i0, i1` and columns `j0, j1` at once.
    pub fn try_remove2(&mut self, i0: usize, i1: usize, j0: usize, j1: usize) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        let n = self.size();
        check_positions("remove2", "row", &[i0, i1], n)?;
        check_positions("remove2", "column", &[j0, j1], n)?;
        self.propose_remove("remove2", vec![i0, i1], vec![j0, j1], Proposal::Remove2)
    }

    /// Ratio of removing `k = rows.len()` rows and columns at once.
    pub fn try_remove_k(&mut self, rows: Vec<usize>, cols: Vec<usize>) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        if rows.is_empty() || rows.len() != cols.len() {
            return Err(invalid(
                "remove_k",
                format!("{} rows and {} columns", rows.len(), cols.len()),
            ));
        }
        let n = self.size();
        check_positions("remove_k", "row", &rows, n)?;
        check_positions("remove_k", "column", &cols, n)?;
        self.propose_remove("remove_k", rows, cols, Proposal::RemoveK)
    }

    fn propose_remove(
        &mut self,
        operation: &'static str,
        rows: Vec<usize>,
        cols: Vec<usize>,
        wrap: fn(BlockRemove) -> Proposal<X, Y, K::Scalar>,
    ) -> Result<K::Scalar, DetManipError> {
        let mut sorted_rows = rows.clone();
        let mut sorted_cols = cols.clone();
        sorted_rows.sort_unstable();
        sorted_cols.sort_unstable();

        // Jacobi: the complementary minor over det(M) is the matching block of
        // M⁻¹ (columns of M index its rows), up to (-1)^(sum of indices).
        let row_slots: Vec<usize> = sorted_rows.iter().map(|&i| self.store.row_slot(i)).collect();
        let col_slots: Vec<usize> = sorted_cols.iter().map(|&j| self.store.col_slot(j)).collect();
        let det = self
            .algebra
            .minor_determinant(&col_slots, &row_slots, self.config.pivot_tolerance(), operation)?;
        let parity = sorted_rows.iter().sum::<usize>() + sorted_cols.iter().sum::<usize>();
        let ratio = det * parity_sign(parity);

        Ok(self.propose(wrap(BlockRemove { rows, cols }), ratio))
    }

    /// Ratio of replacing the argument of logical row `i` with `x`.
    pub fn try_change_row(&mut self, i: usize, x: X) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        let n = self.size();
        check_positions("change_row", "row", &[i], n)?;
        let a = self.store.row_slot(i);
        let ys = self.store.internal_cols();
        let u = Vector::<K::Scalar>::from_fn(n, |c, _| self.kernel.evaluate(&x, &ys[c]));
        let update = self
            .algebra
            .row_update(a, &u, self.config.pivot_tolerance(), "change_row")?;
        let ratio = update.ratio();
        Ok(self.propose(Proposal::ChangeRow { i, x, update }, ratio))
    }

    /// Ratio of replacing the argument of logical column `j` with `y`.
    pub fn try_change_col(&mut self, j: usize, y: Y) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        let n = self.size();
        check_positions("change_col", "column", &[j], n)?;
        let b = self.store.col_slot(j);
        let xs = self.store.internal_rows();
        let v = Vector::<K::Scalar>::from_fn(n, |r, _| self.kernel.evaluate(&xs[r], &y));
        let update = self
            .algebra
            .col_update(b, &v, self.config.pivot_tolerance(), "change_col")?;
        let ratio = update.ratio();
        Ok(self.propose(Proposal::ChangeCol { j, y, update }, ratio))
    }

    /// Ratio of replacing row `i` and column `j` together, as one rank-2 update.
    pub fn try_change_row_col(&mut self, i: usize, j: usize, x: X, y: Y) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        let n = self.size();
        check_positions("change_row_col", "row", &[i], n)?;
        check_positions("change_row_col", "column", &[j], n)?;
        let a = self.store.row_slot(i);
        let b = self.store.col_slot(j);
        let xs = self.store.internal_rows();
        let ys = self.store.internal_cols();
        let f = &self.kernel;

        let corner = f.evaluate(&x, &y);
        let nrow = Vector::<K::Scalar>::from_fn(n, |c, _| {
            if c == b {
                corner.clone()
            } else {
                f.evaluate(&x, &ys[c])
            }
        });
        // The old corner stays in the column vector; the row vector carries the new one.
        let ncol = Vector::<K::Scalar>::from_fn(n, |r, _| {
            if r == a {
                f.evaluate(&xs[a], &ys[b])
            } else {
                f.evaluate(&xs[r], &y)
            }
        });
        let update = self.algebra.cross_update(
            a,
            b,
            &nrow,
            &ncol,
            corner,
            self.config.pivot_tolerance(),
            "change_row_col",
        )?;
        let ratio = update.ratio();
        Ok(self.propose(Proposal::ChangeRowCol { i, j, x, y, update }, ratio))
    }

    /// Ratio of replacing every argument at once. Factorizes the new matrix
    /// from scratch, so this costs O(N³).
    pub fn try_refill(&mut self, xs: Vec<X>, ys: Vec<Y>) -> Result<K::Scalar, DetManipError> {
        self.ensure_idle()?;
        if xs.len() != ys.len() {
            return Err(DetManipError::ShapeMismatch {
                rows: xs.len(),
                cols: ys.len(),
            });
        }
        let m = dense_matrix(&self.kernel, &xs, &ys);
        let fresh = Factorization::compute(m, self.config.pivot_tolerance(), "refill")?;
        let ratio = fresh.det() / self.determinant();
        Ok(self.propose(Proposal::Refill { xs, ys, fresh }, ratio))
    }

    // --- Commit / rollback ---

    /// Folds the pending proposal into the committed state.
    pub fn complete_operation(&mut self) -> Result<(), DetManipError> {
        let (proposal, ratio) = match std::mem::replace(&mut self.transaction, Transaction::Committed) {
            Transaction::Committed => return Err(DetManipError::NoPendingOperation),
            Transaction::Proposed { proposal, ratio } => (proposal, ratio),
        };
        let operation = proposal.operation();

        match proposal {
            Proposal::Insert(block) | Proposal::Insert2(block) | Proposal::InsertK(block) => {
                self.commit_insert(block)
            }
            Proposal::Remove(block) | Proposal::Remove2(block) | Proposal::RemoveK(block) => {
                self.commit_remove(operation, block)?
            }
            Proposal::ChangeRow { i, x, update } => {
                let a = self.store.row_slot(i);
                self.algebra.commit_row(a, update);
                self.store.replace_row(a, x);
            }
            Proposal::ChangeCol { j, y, update } => {
                let b = self.store.col_slot(j);
                self.algebra.commit_col(b, update);
                self.store.replace_col(b, y);
            }
            Proposal::ChangeRowCol { i, j, x, y, update } => {
                let a = self.store.row_slot(i);
                let b = self.store.col_slot(j);
                self.algebra.commit_cross(a, b, update);
                self.store.replace_row(a, x);
                self.store.replace_col(b, y);
            }
            Proposal::Refill { xs, ys, fresh } => {
                self.store.refill(xs, ys);
                self.algebra.install(fresh);
                self.algebra.reset_sign();
            }
        }

        trace!(operation, size = self.size(), ratio = %ratio, "committed");
        if let Some(journal) = self.journal.as_mut() {
            journal.record(operation, self.store.size(), ratio.to_string(), self.algebra.determinant().to_string());
        }

        self.commits_since_check += 1;
        let period = self.config.n_operations_before_check;
        if period > 0 && self.commits_since_check >= period {
            self.commits_since_check = 0;
            self.check_drift();
        }
        Ok(())
    }

    fn commit_insert(&mut self, block: BlockInsert<X, Y, K::Scalar>) {
        let needed = self.size() + block.rows.len();
        if let Some(capacity) = self.store.growth_for(needed) {
            debug!(from = self.capacity(), to = capacity, "growing buffers");
            self.store.reserve(capacity);
            self.algebra.grow(capacity);
        }
        let parity = self.store.insert_rows(block.rows) + self.store.insert_cols(block.cols);
        self.algebra.commit_border(block.border);
        self.algebra.flip_sign(parity);
    }

    fn commit_remove(&mut self, operation: &'static str, block: BlockRemove) -> Result<(), DetManipError> {
        let k = block.rows.len();
        let row_slots: Vec<usize> = block.rows.iter().map(|&i| self.store.row_slot(i)).collect();
        let col_slots: Vec<usize> = block.cols.iter().map(|&j| self.store.col_slot(j)).collect();

        // 1. Move the doomed slots to the tail; the logical matrix is unchanged.
        let n = self.size();
        let start = n - k;
        let free_rows = (start..n).filter(|t| !row_slots.contains(t));
        for (s, t) in row_slots.iter().copied().filter(|&s| s < start).zip(free_rows) {
            let parity = self.store.swap_row_slots(s, t);
            self.algebra.swap_row_slots(s, t);
            self.algebra.flip_sign(parity);
        }
        let free_cols = (start..n).filter(|t| !col_slots.contains(t));
        for (s, t) in col_slots.iter().copied().filter(|&s| s < start).zip(free_cols) {
            let parity = self.store.swap_col_slots(s, t);
            self.algebra.swap_col_slots(s, t);
            self.algebra.flip_sign(parity);
        }

        // 2. Downdate the inverse, then drop the tail.
        self.algebra.commit_removal(k, operation)?;
        let parity = self.store.remove_trailing(k);
        self.algebra.flip_sign(parity);
        Ok(())
    }

    /// Drops the pending proposal. Returns `false` (and does nothing) when
    /// nothing was pending.
    pub fn reject_last_try(&mut self) -> bool {
        match std::mem::replace(&mut self.transaction, Transaction::Committed) {
            Transaction::Committed => false,
            Transaction::Proposed { proposal, .. } => {
                trace!(operation = proposal.operation(), "rejected");
                true
            }
        }
    }

    // --- Direct edits ---

    /// `try_insert` followed by `complete_operation`.
    pub fn insert(&mut self, i: usize, j: usize, x: X, y: Y) -> Result<K::Scalar, DetManipError> {
        let ratio = self.try_insert(i, j, x, y)?;
        self.complete_operation()?;
        Ok(ratio)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert2(
        &mut self,
        i0: usize,
        i1: usize,
        j0: usize,
        j1: usize,
        x0: X,
        x1: X,
        y0: Y,
        y1: Y,
    ) -> Result<K::Scalar, DetManipError> {
        let ratio = self.try_insert2(i0, i1, j0, j1, x0, x1, y0, y1)?;
        self.complete_operation()?;
        Ok(ratio)
    }

    pub fn remove(&mut self, i: usize, j: usize) -> Result<K::Scalar, DetManipError> {
        let ratio = self.try_remove(i, j)?;
        self.complete_operation()?;
        Ok(ratio)
    }

    pub fn remove2(&mut self, i0: usize, i1: usize, j0: usize, j1: usize) -> Result<K::Scalar, DetManipError> {
        let ratio = self.try_remove2(i0, i1, j0, j1)?;
        self.complete_operation()?;
        Ok(ratio)
    }

    pub fn change_row(&mut self, i: usize, x: X) -> Result<K::Scalar, DetManipError> {
        let ratio = self.try_change_row(i, x)?;
        self.complete_operation()?;
        Ok(ratio)
    }

    pub fn change_col(&mut self, j: usize, y: Y) -> Result<K::Scalar, DetManipError> {
        let ratio = self.try_change_col(j, y)?;
        self.complete_operation()?;
        Ok(ratio)
    }

    pub fn change_row_col(&mut self, i: usize, j: usize, x: X, y: Y) -> Result<K::Scalar, DetManipError> {
        let ratio = self.try_change_row_col(i, j, x, y)?;
        self.complete_operation()?;
        Ok(ratio)
    }

    pub fn refill(&mut self, xs: Vec<X>, ys: Vec<Y>) -> Result<K::Scalar, DetManipError> {
        let ratio = self.try_refill(xs, ys)?;
        self.complete_operation()?;
        Ok(ratio)
    }

    // --- Structure ---

    /// Swaps logical rows `i0` and `i1`; the determinant changes sign.
    pub fn swap_rows(&mut self, i0: usize, i1: usize) -> Result<(), DetManipError> {
        self.ensure_idle()?;
        check_positions("swap_rows", "row", &[i0], self.size())?;
        check_positions("swap_rows", "row", &[i1], self.size())?;
        let parity = self.store.swap_rows(i0, i1);
        self.algebra.flip_sign(parity);
        Ok(())
    }

    /// Swaps logical columns `j0` and `j1`; the determinant changes sign.
    pub fn swap_cols(&mut self, j0: usize, j1: usize) -> Result<(), DetManipError> {
        self.ensure_idle()?;
        check_positions("swap_cols", "column", &[j0], self.size())?;
        check_positions("swap_cols", "column", &[j1], self.size())?;
        let parity = self.store.swap_cols(j0, j1);
        self.algebra.flip_sign(parity);
        Ok(())
    }

    /// Back to the empty matrix (determinant 1), keeping the buffers.
    pub fn clear(&mut self) -> Result<(), DetManipError> {
        self.ensure_idle()?;
        self.store.clear();
        self.algebra.clear();
        self.commits_since_check = 0;
        Ok(())
    }

    /// Grows the buffers so that `capacity` rows fit without reallocating.
    pub fn reserve(&mut self, capacity: usize) {
        self.store.reserve(capacity);
        self.algebra.grow(capacity);
    }

    // --- Verification ---

    fn internal_matrix(&self) -> Matrix<K::Scalar> {
        dense_matrix(&self.kernel, self.store.internal_rows(), self.store.internal_cols())
    }

    /// Recomputes the inverse and determinant from scratch. O(N³).
    pub fn regenerate(&mut self) -> Result<(), DetManipError> {
        self.ensure_idle()?;
        let fresh = Factorization::compute(self.internal_matrix(), self.config.pivot_tolerance(), "regenerate")?;
        debug!(size = self.size(), "regenerated inverse");
        self.algebra.install(fresh);
        self.commits_since_check = 0;
        Ok(())
    }

    // Periodic guard against accumulated rounding: compare with a fresh
    // factorization, report, and keep the fresh one.
    fn check_drift(&mut self) {
        let fresh = match Factorization::compute(self.internal_matrix(), PivotTolerance::EXACT, "drift check") {
            Ok(fresh) => fresh,
            Err(e) => {
                error!(error = %e, size = self.size(), "drift check could not factorize the matrix");
                return;
            }
        };
        let deviation = self.algebra.deviation(fresh.inverse());
        if deviation > self.config.precision_error {
            error!(deviation, size = self.size(), "inverse drift above precision_error");
        } else if deviation > self.config.precision_warning {
            warn!(deviation, size = self.size(), "inverse drift above precision_warning");
        } else {
            debug!(deviation, size = self.size(), "drift check passed");
        }
        self.algebra.install(fresh);
    }

    /// Compares the maintained inverse and determinant with a dense
    /// recomputation. O(N³); meant for tests and debugging.
    pub fn check_consistency(&self) -> ConsistencyReport {
        let n = self.size();
        let m = self.matrix();
        let residual = &m * self.inverse_matrix() - Matrix::<K::Scalar>::identity(n, n);
        let inverse_residual = residual.iter().map(|e| modulus(e.clone())).fold(0.0, f64::max);

        let dense_det = if n == 0 { nalgebra::one::<K::Scalar>() } else { m.determinant() };
        let scale = modulus(dense_det.clone()).max(f64::MIN_POSITIVE);
        let determinant_error = modulus(self.determinant() - dense_det) / scale;

        ConsistencyReport {
            inverse_residual,
            determinant_error,
        }
    }

    // --- Provenance ---

    /// Starts recording every commit in a hash-chained journal.
    pub fn enable_journal(&mut self) {
        self.journal.get_or_insert_with(CommitJournal::new);
    }

    pub fn journal(&self) -> Option<&CommitJournal> {
        self.journal.as_ref()
    }

    /// Stops recording and hands back the journal.
    pub fn take_journal(&mut self) -> Option<CommitJournal> {
        self.journal.take()
    }
}
