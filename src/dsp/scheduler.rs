//! Bin Work Distribution
//!
//! Bins are independent, so the engine hands the scheduler a range and a
//! `process_bin` closure and gets back one result per bin, in bin order.
//! Results are owned buffers; nothing is written to shared memory while
//! workers run.
//!
//! Enable the rayon scheduler with the `parallel` feature (on by default).

use std::ops::Range;

pub trait BinScheduler {
    fn run<R, F>(&self, bins: Range<usize>, process_bin: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send;
}

/// In-order, on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialScheduler;

impl BinScheduler for SequentialScheduler {
    fn run<R, F>(&self, bins: Range<usize>, process_bin: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        bins.map(process_bin).collect()
    }
}

/// Spreads bins over the global rayon pool.
#[cfg(feature = "parallel")]
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonScheduler;

#[cfg(feature = "parallel")]
impl BinScheduler for RayonScheduler {
    fn run<R, F>(&self, bins: Range<usize>, process_bin: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        use rayon::prelude::*;

        bins.into_par_iter().map(process_bin).collect()
    }
}
