// src/store/mod.rs

//! The argument store: ordered row and column arguments.
//!
//! Arguments are kept in *internal* order, which is the order they were
//! inserted in. A pair of permutations maps each logical index (the index the
//! caller sees) to its internal slot, so inserting at an arbitrary logical
//! position never moves argument or matrix data. Every permutation change is
//! reported as a parity (number of adjacent transpositions, modulo 2 is all
//! that matters) so the algebraic state can keep the determinant sign.

use crate::kernel::Kernel;
use crate::DetManipError;

/// Row and column arguments plus the logical to internal index maps.
#[derive(Debug, Clone)]
pub struct ArgumentStore<X, Y> {
    xs: Vec<X>,
    ys: Vec<Y>,
    row_perm: Vec<usize>,
    col_perm: Vec<usize>,
    capacity: usize,
}

impl<X, Y> ArgumentStore<X, Y> {
    /// Creates an empty store with room for `capacity` rows and columns.
    pub fn new(capacity: usize) -> Self {
        ArgumentStore {
            xs: Vec::with_capacity(capacity),
            ys: Vec::with_capacity(capacity),
            row_perm: Vec::with_capacity(capacity),
            col_perm: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Current logical dimension N.
    pub fn size(&self) -> usize {
        self.xs.len()
    }

    /// Physical capacity C >= N.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the capacity the buffers must grow to so that `needed` rows
    /// fit, or `None` if they already fit. Growth at least doubles.
    pub fn growth_for(&self, needed: usize) -> Option<usize> {
        if needed <= self.capacity {
            return None;
        }
        Some(needed.max(2 * self.capacity).max(1))
    }

    /// Grows the argument buffers to `capacity`. Never shrinks.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        let extra = capacity - self.xs.len();
        self.xs.reserve_exact(extra);
        self.ys.reserve_exact(extra);
        self.row_perm.reserve_exact(extra);
        self.col_perm.reserve_exact(extra);
        self.capacity = capacity;
    }

    /// Internal slot of logical row `i`. Caller guarantees `i < N`.
    pub fn row_slot(&self, i: usize) -> usize {
        self.row_perm[i]
    }

    /// Internal slot of logical column `j`. Caller guarantees `j < N`.
    pub fn col_slot(&self, j: usize) -> usize {
        self.col_perm[j]
    }

    /// Row argument at logical index `i`.
    pub fn row_arg(&self, i: usize) -> Result<&X, DetManipError> {
        self.row_perm
            .get(i)
            .map(|&slot| &self.xs[slot])
            .ok_or(DetManipError::IndexOutOfRange {
                index: i,
                size: self.size(),
            })
    }

    /// Column argument at logical index `j`.
    pub fn col_arg(&self, j: usize) -> Result<&Y, DetManipError> {
        self.col_perm
            .get(j)
            .map(|&slot| &self.ys[slot])
            .ok_or(DetManipError::IndexOutOfRange {
                index: j,
                size: self.size(),
            })
    }

    /// Row arguments in logical order.
    pub fn row_args(&self) -> impl ExactSizeIterator<Item = &X> + '_ {
        self.row_perm.iter().map(move |&slot| &self.xs[slot])
    }

    /// Column arguments in logical order.
    pub fn col_args(&self) -> impl ExactSizeIterator<Item = &Y> + '_ {
        self.col_perm.iter().map(move |&slot| &self.ys[slot])
    }

    /// Row arguments in internal order.
    pub fn internal_rows(&self) -> &[X] {
        &self.xs
    }

    /// Column arguments in internal order.
    pub fn internal_cols(&self) -> &[Y] {
        &self.ys
    }

    /// `f(row_arg(i), col_arg(j))`.
    pub fn evaluate<K: Kernel<X, Y>>(
        &self,
        kernel: &K,
        i: usize,
        j: usize,
    ) -> Result<K::Scalar, DetManipError> {
        Ok(kernel.evaluate(self.row_arg(i)?, self.col_arg(j)?))
    }

    /// Parity of placing new internal slots `N, N+1, ...` at the final
    /// logical `positions` (in that order), relative to appending them.
    ///
    /// Each new slot is larger than every old one, so it is inverted with
    /// every old slot to its right, plus any new slot it is out of order with.
    pub fn insertion_parity(positions: &[usize], size_before: usize) -> usize {
        let final_len = size_before + positions.len();
        let mut parity = 0;
        for (t, &p) in positions.iter().enumerate() {
            let new_after = positions.iter().filter(|&&q| q > p).count();
            parity += final_len - 1 - p - new_after;
            parity += positions[t + 1..].iter().filter(|&&q| q < p).count();
        }
        parity
    }

    /// Appends new rows (argument plus final logical position) and returns
    /// the parity of the row permutation change.
    pub fn insert_rows(&mut self, rows: Vec<(usize, X)>) -> usize {
        let parity = Self::place(&mut self.row_perm, self.xs.len(), &rows);
        self.xs.extend(rows.into_iter().map(|(_, x)| x));
        parity
    }

    /// Appends new columns; see [`ArgumentStore::insert_rows`].
    pub fn insert_cols(&mut self, cols: Vec<(usize, Y)>) -> usize {
        let parity = Self::place(&mut self.col_perm, self.ys.len(), &cols);
        self.ys.extend(cols.into_iter().map(|(_, y)| y));
        parity
    }

    fn place<A>(perm: &mut Vec<usize>, size_before: usize, entries: &[(usize, A)]) -> usize {
        let positions: Vec<usize> = entries.iter().map(|(p, _)| *p).collect();
        let parity = Self::insertion_parity(&positions, size_before);

        // Inserting by increasing final position lands every entry where it belongs.
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&t| positions[t]);
        for t in order {
            perm.insert(positions[t], size_before + t);
        }
        parity
    }

    /// Drops the last `k` internal rows and columns and returns the parity
    /// of both permutation changes combined.
    pub fn remove_trailing(&mut self, k: usize) -> usize {
        let keep = self.xs.len() - k;
        let parity = Self::removal_parity(&self.row_perm, keep) + Self::removal_parity(&self.col_perm, keep);
        self.row_perm.retain(|&slot| slot < keep);
        self.col_perm.retain(|&slot| slot < keep);
        self.xs.truncate(keep);
        self.ys.truncate(keep);
        parity
    }

    // Mirror of `insertion_parity`: slots >= keep are the ones leaving, and
    // every kept slot is smaller than every leaving one.
    fn removal_parity(perm: &[usize], keep: usize) -> usize {
        let mut parity = 0;
        for (p, &slot) in perm.iter().enumerate() {
            if slot < keep {
                continue;
            }
            parity += perm[p + 1..].iter().filter(|&&s| s < slot).count();
        }
        parity
    }

    /// Exchanges internal row slots `a` and `b` without changing the logical
    /// matrix. Returns the parity (1 if the slots differ).
    pub fn swap_row_slots(&mut self, a: usize, b: usize) -> usize {
        Self::relabel(&mut self.row_perm, a, b);
        self.xs.swap(a, b);
        usize::from(a != b)
    }

    /// Exchanges internal column slots; see [`ArgumentStore::swap_row_slots`].
    pub fn swap_col_slots(&mut self, a: usize, b: usize) -> usize {
        Self::relabel(&mut self.col_perm, a, b);
        self.ys.swap(a, b);
        usize::from(a != b)
    }

    fn relabel(perm: &mut [usize], a: usize, b: usize) {
        if a == b {
            return;
        }
        for slot in perm.iter_mut() {
            if *slot == a {
                *slot = b;
            } else if *slot == b {
                *slot = a;
            }
        }
    }

    /// Swaps logical rows `i0` and `i1`. Returns the parity.
    pub fn swap_rows(&mut self, i0: usize, i1: usize) -> usize {
        self.row_perm.swap(i0, i1);
        usize::from(i0 != i1)
    }

    /// Swaps logical columns `j0` and `j1`. Returns the parity.
    pub fn swap_cols(&mut self, j0: usize, j1: usize) -> usize {
        self.col_perm.swap(j0, j1);
        usize::from(j0 != j1)
    }

    /// Replaces the row argument in internal slot `a`, returning the old one.
    pub fn replace_row(&mut self, a: usize, x: X) -> X {
        std::mem::replace(&mut self.xs[a], x)
    }

    /// Replaces the column argument in internal slot `b`, returning the old one.
    pub fn replace_col(&mut self, b: usize, y: Y) -> Y {
        std::mem::replace(&mut self.ys[b], y)
    }

    /// Replaces every argument; logical and internal order coincide afterwards.
    pub fn refill(&mut self, xs: Vec<X>, ys: Vec<Y>) {
        debug_assert_eq!(xs.len(), ys.len());
        let n = xs.len();
        self.reserve(n);
        self.xs = xs;
        self.ys = ys;
        self.row_perm = (0..n).collect();
        self.col_perm = (0..n).collect();
        self.fill_to_capacity();
    }

    // The swapped-in vectors come with whatever room the caller gave them.
    fn fill_to_capacity(&mut self) {
        let c = self.capacity;
        self.xs.reserve_exact(c.saturating_sub(self.xs.len()));
        self.ys.reserve_exact(c.saturating_sub(self.ys.len()));
        self.row_perm.reserve_exact(c.saturating_sub(self.row_perm.len()));
        self.col_perm.reserve_exact(c.saturating_sub(self.col_perm.len()));
    }

    /// Removes every argument, keeping the capacity.
    pub fn clear(&mut self) {
        self.xs.clear();
        self.ys.clear();
        self.row_perm.clear();
        self.col_perm.clear();
    }
}
