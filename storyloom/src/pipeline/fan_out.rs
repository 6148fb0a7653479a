//! Bounded fan-out executor.
//!
//! Runs independent units concurrently with at most `limit` in flight and
//! returns their results in input order. The semaphore is owned by the
//! executor, so every pipeline sharing one `FanOut` shares its ceiling.
//!
//! The first failing unit fails the whole batch. Units already spawned are
//! not cancelled; they run to completion and their results are dropped.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct FanOut {
    name: &'static str,
    limit: usize,
    semaphore: Arc<Semaphore>,
}

impl FanOut {
    /// Create an executor. A `limit` of 0 is raised to 1.
    pub fn new(name: &'static str, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            name,
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run all `units`, awaiting `on_complete(index, completed, total)` in the
    /// caller's task after each success. `completed` counts finished units, so
    /// it only grows even when units finish out of order.
    pub async fn run<T, Fut, P, PFut>(&self, units: Vec<Fut>, mut on_complete: P) -> Result<Vec<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        P: FnMut(usize, usize, usize) -> PFut,
        PFut: Future<Output = ()>,
    {
        let total = units.len();
        let mut pending = FuturesUnordered::new();

        for (index, unit) in units.into_iter().enumerate() {
            let semaphore = Arc::clone(&self.semaphore);
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Other("fan-out semaphore closed".to_string()))?;
                unit.await
            });
            pending.push(async move { (index, handle.await) });
        }

        let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut completed = 0usize;

        while let Some((index, joined)) = pending.next().await {
            let value = match joined {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    warn!(
                        fan_out = self.name,
                        unit = index + 1,
                        total,
                        error = %e,
                        "Fan-out unit failed, abandoning batch"
                    );
                    return Err(e);
                }
                Err(join_err) => {
                    return Err(Error::Other(format!(
                        "{} unit {} of {} aborted: {}",
                        self.name,
                        index + 1,
                        total,
                        join_err
                    )));
                }
            };
            results[index] = Some(value);
            completed += 1;
            debug!(fan_out = self.name, unit = index + 1, completed, total, "Fan-out unit done");
            on_complete(index, completed, total).await;
        }

        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.ok_or_else(|| {
                    Error::Other(format!("{} unit {} produced no result", self.name, i + 1))
                })
            })
            .collect()
    }
}
