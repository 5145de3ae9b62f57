//! Process communicators
//!
//! The distributed pieces of this workspace only need a handful of blocking
//! collectives. Every rank must call them in the same order, otherwise the
//! exchange deadlocks; there is no partial or asynchronous mode.
//!
//! - [`SerialComm`]: a single process
//! - [`LocalComm`]: several ranks living in one address space (one thread
//!   per rank), used to exercise multi-process code paths in tests

use std::sync::{Arc, Barrier, Mutex, PoisonError};

/// Blocking collective operations over a fixed group of ranks
pub trait Communicator: Send + Sync {
    /// Rank of the calling process, in `0..size()`
    fn rank(&self) -> usize;

    /// Number of processes in the group
    fn size(&self) -> usize;

    /// Gather one buffer from every rank; the result is indexed by rank.
    fn all_gather_i64(&self, local: &[i64]) -> Vec<Vec<i64>>;

    /// Gather one buffer from every rank; the result is indexed by rank.
    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>>;

    /// Gather one count per rank
    fn all_gather_count(&self, count: i64) -> Vec<i64> {
        self.all_gather_i64(&[count])
            .into_iter()
            .map(|v| v.first().copied().unwrap_or(0))
            .collect()
    }

    /// Sum a value over all ranks.
    ///
    /// Contributions are added in rank order so every rank obtains the
    /// bitwise identical result.
    fn all_reduce_sum(&self, value: f64) -> f64 {
        self.all_gather_f64(&[value])
            .iter()
            .map(|v| v.first().copied().unwrap_or(0.0))
            .sum()
    }

    /// Maximum of a value over all ranks
    fn all_reduce_max(&self, value: f64) -> f64 {
        self.all_gather_f64(&[value])
            .iter()
            .filter_map(|v| v.first().copied())
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Concatenate one buffer per rank in rank order
    fn all_gather_concat(&self, local: &[f64]) -> Vec<f64> {
        self.all_gather_f64(local).concat()
    }
}

/// Communicator for a single process
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather_i64(&self, local: &[i64]) -> Vec<Vec<i64>> {
        vec![local.to_vec()]
    }

    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        vec![local.to_vec()]
    }
}

#[derive(Debug)]
struct LocalExchange {
    barrier: Barrier,
    ints: Mutex<Vec<Vec<i64>>>,
    reals: Mutex<Vec<Vec<f64>>>,
}

/// In-process communicator: one handle per rank, each used from its own thread
#[derive(Debug, Clone)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    shared: Arc<LocalExchange>,
}

impl LocalComm {
    /// Create the handles of a group of `size` ranks
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn group(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "a communicator needs at least one rank");
        let shared = Arc::new(LocalExchange {
            barrier: Barrier::new(size),
            ints: Mutex::new(vec![Vec::new(); size]),
            reals: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn exchange<T: Clone>(&self, slots: &Mutex<Vec<Vec<T>>>, local: &[T]) -> Vec<Vec<T>> {
        {
            let mut guard = slots.lock().unwrap_or_else(PoisonError::into_inner);
            guard[self.rank] = local.to_vec();
        }
        self.shared.barrier.wait();
        let gathered = slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        // nobody may overwrite a slot before every rank has read it
        self.shared.barrier.wait();
        gathered
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather_i64(&self, local: &[i64]) -> Vec<Vec<i64>> {
        self.exchange(&self.shared.ints, local)
    }

    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        self.exchange(&self.shared.reals, local)
    }
}
