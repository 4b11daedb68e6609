// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Scheduling and thread-local scratch
//!
//! Parallel work runs on a rayon work-stealing pool: tasks spawned in a
//! scope may spawn child tasks, and a worker waiting on a scope processes
//! other tasks instead of blocking, so nested parallelism cannot deadlock.
//! A panic inside a task propagates to the caller of the enclosing scope.
//!
//! The [`Scheduler`] trait abstracts the pool for the solver loop: it
//! provides the worker count, the calling worker's index (for thread-local
//! scratch) and a ranged `parallel_for`. [`SequentialScheduler`] runs
//! everything inline and is always available; [`WorkStealingScheduler`]
//! requires the `parallel` feature.
//!
//! [`ThreadLocal`] is a container with one slot per worker plus a shared
//! fallback slot for non-worker threads; slots are initialized lazily on
//! first use by the owning worker.

use std::ops::{Deref, DerefMut, Range};
use std::sync::{Mutex, MutexGuard};

/// Abstraction of the worker pool used by solvers and finders
pub trait Scheduler: Send + Sync {
    /// Number of worker threads
    fn thread_count(&self) -> usize;

    /// Index of the calling worker in [0, thread_count), or `None` when the
    /// caller is not a worker of this scheduler
    fn thread_index(&self) -> Option<usize>;

    /// Splits the index range into chunks of at most `granularity` and
    /// processes them on the pool, returning after all chunks finished
    fn parallel_for(
        &self,
        range: Range<usize>,
        granularity: usize,
        func: &(dyn Fn(Range<usize>) + Send + Sync),
    );

    /// Runs both closures, potentially concurrently, returning after both
    /// finished
    fn parallel_invoke(&self, a: &(dyn Fn() + Send + Sync), b: &(dyn Fn() + Send + Sync));
}

/// Scheduler executing everything inline on the calling thread
pub struct SequentialScheduler;

impl Scheduler for SequentialScheduler {
    fn thread_count(&self) -> usize {
        1
    }

    fn thread_index(&self) -> Option<usize> {
        Some(0)
    }

    fn parallel_for(
        &self,
        range: Range<usize>,
        granularity: usize,
        func: &(dyn Fn(Range<usize>) + Send + Sync),
    ) {
        let mut from = range.start;
        while from < range.end {
            let to = (from + granularity.max(1)).min(range.end);
            func(from..to);
            from = to;
        }
    }

    fn parallel_invoke(&self, a: &(dyn Fn() + Send + Sync), b: &(dyn Fn() + Send + Sync)) {
        a();
        b();
    }
}

/// Scheduler backed by a rayon work-stealing thread pool
#[cfg(feature = "parallel")]
pub struct WorkStealingScheduler {
    pool: rayon::ThreadPool,
}

#[cfg(feature = "parallel")]
impl WorkStealingScheduler {
    /// Creates the scheduler with the given worker count; zero selects the
    /// hardware parallelism
    pub fn new(thread_cnt: usize) -> crate::error::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_cnt)
            .build()
            .map_err(|e| {
                crate::error::Error::InvalidSetup(format!("cannot build thread pool: {}", e))
            })?;
        Ok(WorkStealingScheduler { pool })
    }
}

#[cfg(feature = "parallel")]
impl Scheduler for WorkStealingScheduler {
    fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn thread_index(&self) -> Option<usize> {
        self.pool.current_thread_index()
    }

    fn parallel_for(
        &self,
        range: Range<usize>,
        granularity: usize,
        func: &(dyn Fn(Range<usize>) + Send + Sync),
    ) {
        let granularity = granularity.max(1);
        self.pool.install(|| {
            rayon::scope(|scope| {
                let mut from = range.start;
                while from < range.end {
                    let to = (from + granularity).min(range.end);
                    scope.spawn(move |_| func(from..to));
                    from = to;
                }
            });
        });
    }

    fn parallel_invoke(&self, a: &(dyn Fn() + Send + Sync), b: &(dyn Fn() + Send + Sync)) {
        self.pool.install(|| {
            rayon::join(|| a(), || b());
        });
    }
}

/// Builds the scheduler configured by the run settings
///
/// Without the `parallel` feature the result is always sequential.
pub fn create_scheduler(
    settings: &crate::settings::RunSettings,
) -> crate::error::Result<Box<dyn Scheduler>> {
    #[cfg(feature = "parallel")]
    {
        let threads: i64 = settings.get(crate::settings::RunSettingsId::RunThreadCnt)?;
        Ok(Box::new(WorkStealingScheduler::new(threads.max(0) as usize)?))
    }
    #[cfg(not(feature = "parallel"))]
    {
        let _ = settings;
        Ok(Box::new(SequentialScheduler))
    }
}

/// Per-worker scratch storage with a fallback slot for non-worker threads
///
/// Each slot is guarded by an uncontended mutex; a worker only ever touches
/// its own slot during parallel sections, the fallback slot serializes
/// access from outside the pool.
pub struct ThreadLocal<T> {
    slots: Vec<Mutex<Option<T>>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Send> ThreadLocal<T> {
    /// Creates empty slots for every worker of the scheduler plus the
    /// fallback slot
    pub fn new(
        scheduler: &dyn Scheduler,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        let slots = (0..scheduler.thread_count() + 1)
            .map(|_| Mutex::new(None))
            .collect();
        ThreadLocal {
            slots,
            factory: Box::new(factory),
        }
    }

    /// The calling worker's slot, initialized lazily on first use
    pub fn local(&self, scheduler: &dyn Scheduler) -> LocalGuard<'_, T> {
        let fallback = self.slots.len() - 1;
        let idx = scheduler.thread_index().unwrap_or(fallback).min(fallback);
        let mut guard = self.slots[idx].lock().expect("thread-local slot poisoned");
        if guard.is_none() {
            *guard = Some((self.factory)());
        }
        LocalGuard { guard }
    }

    /// Drains all initialized slots, applying `func` to each
    pub fn for_each(&mut self, mut func: impl FnMut(&mut T)) {
        for slot in &mut self.slots {
            if let Some(value) = slot.get_mut().expect("thread-local slot poisoned") {
                func(value);
            }
        }
    }

    /// Number of slots that have been initialized
    pub fn initialized_count(&mut self) -> usize {
        let mut count = 0;
        for slot in self.slots.iter_mut() {
            if slot.get_mut().expect("thread-local slot poisoned").is_some() {
                count += 1;
            }
        }
        count
    }
}

/// Guard dereferencing to the worker's thread-local value
pub struct LocalGuard<'a, T> {
    guard: MutexGuard<'a, Option<T>>,
}

impl<T> Deref for LocalGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().expect("initialized in local()")
    }
}

impl<T> DerefMut for LocalGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("initialized in local()")
    }
}

/// Applies `func(i, &mut slice[i])` over the whole slice, in parallel when
/// the `parallel` feature is enabled
///
/// The single feature-gated site backing the per-particle loops of equation
/// finalizers and integrators.
pub fn parallel_for_each<T, F>(slice: &mut [T], func: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        slice
            .par_iter_mut()
            .with_min_len(1000)
            .enumerate()
            .for_each(|(i, item)| func(i, item));
    }
    #[cfg(not(feature = "parallel"))]
    {
        for (i, item) in slice.iter_mut().enumerate() {
            func(i, item);
        }
    }
}

/// Applies `func(i, &mut a[i], &mut b[i])` over two equally long slices
pub fn parallel_for_each_zip<A, B, F>(a: &mut [A], b: &mut [B], func: F)
where
    A: Send,
    B: Send,
    F: Fn(usize, &mut A, &mut B) + Send + Sync,
{
    debug_assert_eq!(a.len(), b.len());
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        a.par_iter_mut()
            .zip(b.par_iter_mut())
            .with_min_len(1000)
            .enumerate()
            .for_each(|(i, (item_a, item_b))| func(i, item_a, item_b));
    }
    #[cfg(not(feature = "parallel"))]
    {
        for (i, (item_a, item_b)) in a.iter_mut().zip(b.iter_mut()).enumerate() {
            func(i, item_a, item_b);
        }
    }
}
