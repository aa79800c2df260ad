#![forbid(unsafe_code)]

//! Symmetric matrices stored as their upper triangle.
//!
//! `HalfMatrix` keeps one slot per unordered index pair so that
//! `get(i, j) == get(j, i)` holds by construction. The diagonal is optional;
//! matrices without it only accept `i != j`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalfMatrix<T> {
    size: usize,
    include_diagonal: bool,
    values: Vec<T>,
}

impl<T: Clone> HalfMatrix<T> {
    /// A `size` x `size` matrix with every slot set to `fill`.
    pub fn new(size: usize, include_diagonal: bool, fill: T) -> Self {
        Self {
            size,
            include_diagonal,
            values: vec![fill; slot_count(size, include_diagonal)],
        }
    }

    pub fn fill(&mut self, value: T) {
        self.values.fill(value);
    }
}

impl<T> HalfMatrix<T> {
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn includes_diagonal(&self) -> bool {
        self.include_diagonal
    }

    /// # Panics
    ///
    /// If either index is out of range, or `i == j` on a matrix without
    /// diagonal.
    #[must_use]
    pub fn get_ref(&self, i: usize, j: usize) -> &T {
        &self.values[self.slot(i, j)]
    }

    /// # Panics
    ///
    /// Same conditions as [`HalfMatrix::get_ref`].
    pub fn get_mut(&mut self, i: usize, j: usize) -> &mut T {
        let slot = self.slot(i, j);
        &mut self.values[slot]
    }

    /// # Panics
    ///
    /// Same conditions as [`HalfMatrix::get_ref`].
    pub fn set(&mut self, i: usize, j: usize, value: T) {
        *self.get_mut(i, j) = value;
    }

    /// All stored `(i, j, value)` triples with `i <= j`, row by row.
    pub fn iter_pairs(&self) -> impl Iterator<Item = (usize, usize, &T)> + '_ {
        let offset = usize::from(!self.include_diagonal);
        (0..self.size)
            .flat_map(move |i| ((i + offset)..self.size).map(move |j| (i, j)))
            .zip(self.values.iter())
            .map(|((i, j), value)| (i, j, value))
    }

    fn slot(&self, i: usize, j: usize) -> usize {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        assert!(
            hi < self.size,
            "half matrix index ({i}, {j}) out of range for size {}",
            self.size
        );
        if self.include_diagonal {
            // rows before `lo` hold size, size-1, ... slots
            lo * (2 * self.size - lo + 1) / 2 + (hi - lo)
        } else {
            assert!(lo != hi, "half matrix without diagonal has no slot ({i}, {i})");
            lo * (2 * self.size - lo - 1) / 2 + (hi - lo - 1)
        }
    }
}

impl<T: Copy> HalfMatrix<T> {
    /// # Panics
    ///
    /// Same conditions as [`HalfMatrix::get_ref`].
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> T {
        *self.get_ref(i, j)
    }
}

impl HalfMatrix<f64> {
    pub fn add(&mut self, i: usize, j: usize, delta: f64) {
        *self.get_mut(i, j) += delta;
    }
}

impl HalfMatrix<u64> {
    pub fn increment(&mut self, i: usize, j: usize) {
        *self.get_mut(i, j) += 1;
    }
}

fn slot_count(size: usize, include_diagonal: bool) -> usize {
    if include_diagonal {
        size * (size + 1) / 2
    } else {
        size * size.saturating_sub(1) / 2
    }
}
