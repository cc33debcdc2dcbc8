//! Parallel evaluation of independent controller instances.
//!
//! Every job builds its own parameter set, correlation memo, controller and
//! simulation; nothing but the read-only configuration crosses threads.

#[cfg(feature = "parallel")]
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::params::ParamPoint;
use crate::testbed::{run_episode, Episode};

/// Clones share one worker pool.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    max_parallelism: usize,
    #[cfg(feature = "parallel")]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRunner {
    /// Sequential until told otherwise.
    pub fn new() -> Self {
        Self {
            max_parallelism: 1,
            #[cfg(feature = "parallel")]
            pool: None,
        }
    }

    /// Upper bound on worker threads. `1` keeps evaluation on the calling thread.
    ///
    /// With the `parallel` feature the worker pool is built here, once.
    pub fn with_max_parallelism(mut self, threads: usize) -> Self {
        self.max_parallelism = threads.max(1);
        #[cfg(feature = "parallel")]
        {
            self.pool = None;
            if self.max_parallelism > 1 {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(self.max_parallelism)
                    .build()
                {
                    Ok(pool) => self.pool = Some(Arc::new(pool)),
                    Err(e) => {
                        debug!("batch: thread pool unavailable ({}), using scoped threads", e)
                    }
                }
            }
        }
        self
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Applies `eval` to every item; results come back in input order.
    pub fn run<T, R, F>(&self, items: &[T], eval: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync,
    {
        if self.max_parallelism <= 1 || items.len() <= 1 {
            return items.iter().enumerate().map(|(i, t)| eval(i, t)).collect();
        }

        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            return pool.install(|| {
                items
                    .par_iter()
                    .enumerate()
                    .map(|(i, t)| eval(i, t))
                    .collect()
            });
        }

        self.run_scoped(items, &eval)
    }

    fn run_scoped<T, R, F>(&self, items: &[T], eval: &F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync,
    {
        let threads = self.max_parallelism.min(items.len()).max(1);
        let chunk = items.len().div_ceil(threads);
        let mut slots: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();

        std::thread::scope(|scope| {
            for (c, (segment, out)) in items.chunks(chunk).zip(slots.chunks_mut(chunk)).enumerate() {
                scope.spawn(move || {
                    for (j, (item, slot)) in segment.iter().zip(out.iter_mut()).enumerate() {
                        *slot = Some(eval(c * chunk + j, item));
                    }
                });
            }
        });

        slots.into_iter().flatten().collect()
    }

    /// Runs one testbed episode per point, seeding point `i` with `seed + i`.
    ///
    /// A point whose controller cannot be built fails alone.
    pub fn run_episodes(
        &self,
        config: &ControllerConfig,
        points: &[ParamPoint],
        seed: u64,
        steps: usize,
        dt: f64,
    ) -> Vec<Result<Episode>> {
        debug!(
            "batch: {} points, {} steps each, up to {} threads",
            points.len(),
            steps,
            self.max_parallelism
        );
        self.run(points, |i, point| {
            run_episode(config, point, seed.wrapping_add(i as u64), steps, dt)
        })
    }
}
