//! Background resource preparation.
//!
//! Each worker thread creates and exclusively owns one [`GpuContext`] (in GL
//! terms, a context sharing its object namespace with the render context).
//! Jobs run on whichever worker is free. When a job finishes, the worker
//! places a fence behind the job's commands and waits for it, so a result
//! published through a [`ResourceTicket`] is safe to use from the render
//! context.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::errors::{RenderError, Result};
use crate::shader::compiler::ShaderCompiler;
use crate::shader::variant::VariantKey;

use super::context::GpuContext;

/// Creates the context of worker `index`. Called on the worker thread.
pub type ContextFactory = Arc<dyn Fn(usize) -> Result<GpuContext> + Send + Sync>;

type Job = Box<dyn FnOnce(&mut GpuContext) + Send>;

/// Readiness of a background resource.
#[derive(Debug)]
pub enum Residency<T> {
    /// Not yet resident: the job or its fence has not completed.
    Pending,
    Ready(T),
    Failed(RenderError),
}

/// Receiving end of one submitted job.
///
/// The value is handed out once; polling again afterwards reports
/// `InvalidHandle`.
#[must_use]
pub struct ResourceTicket<T> {
    receiver: flume::Receiver<Result<T>>,
    taken: bool,
}

impl<T> ResourceTicket<T> {
    /// Non-blocking readiness check.
    pub fn poll(&mut self) -> Residency<T> {
        if self.taken {
            return Residency::Failed(RenderError::InvalidHandle("consumed resource ticket"));
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.taken = true;
                match result {
                    Ok(value) => Residency::Ready(value),
                    Err(err) => Residency::Failed(err),
                }
            }
            Err(flume::TryRecvError::Empty) => Residency::Pending,
            Err(flume::TryRecvError::Disconnected) => {
                self.taken = true;
                Residency::Failed(RenderError::WorkerDisconnected)
            }
        }
    }

    /// Blocks until the resource is ready or `timeout` elapses.
    pub fn wait(self, timeout: Duration) -> Result<T> {
        if self.taken {
            return Err(RenderError::InvalidHandle("consumed resource ticket"));
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(flume::RecvTimeoutError::Timeout) => Err(RenderError::FenceTimeout { timeout }),
            Err(flume::RecvTimeoutError::Disconnected) => Err(RenderError::WorkerDisconnected),
        }
    }
}

/// Outcome of a background variant precompilation.
#[derive(Debug, Default)]
pub struct PrecompileReport {
    pub compiled: usize,
    /// Label and error of every variant that failed.
    pub failed: Vec<(String, RenderError)>,
}

pub struct ResourceWorkerPool {
    jobs: Option<flume::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    fence_timeout: Duration,
}

impl ResourceWorkerPool {
    /// Spawns `threads` workers and waits until each has created its context.
    ///
    /// Fails if any context cannot be created; already started workers are
    /// shut down again.
    pub fn new(threads: usize, fence_timeout: Duration, factory: ContextFactory) -> Result<Self> {
        let (job_tx, job_rx) = flume::unbounded::<Job>();
        let (ready_tx, ready_rx) = flume::bounded::<Result<()>>(threads.max(1));

        let mut pool = Self {
            jobs: Some(job_tx),
            workers: Vec::with_capacity(threads),
            fence_timeout,
        };

        for index in 0..threads.max(1) {
            let jobs = job_rx.clone();
            let ready = ready_tx.clone();
            let factory = factory.clone();
            let handle = thread::Builder::new()
                .name(format!("lumen-worker-{index}"))
                .spawn(move || Self::worker_main(index, &factory, &jobs, &ready))?;
            pool.workers.push(handle);
        }
        drop(ready_tx);

        for _ in 0..pool.workers.len() {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => return Err(RenderError::WorkerDisconnected),
            }
        }

        log::info!("Resource worker pool started with {} thread(s)", pool.workers.len());
        Ok(pool)
    }

    fn worker_main(
        index: usize,
        factory: &ContextFactory,
        jobs: &flume::Receiver<Job>,
        ready: &flume::Sender<Result<()>>,
    ) {
        let mut gpu = match factory(index) {
            Ok(gpu) => {
                let _ = ready.send(Ok(()));
                gpu
            }
            Err(err) => {
                log::error!("Worker {index} failed to create its GPU context: {err}");
                let _ = ready.send(Err(err));
                return;
            }
        };
        while let Ok(job) = jobs.recv() {
            job(&mut gpu);
        }
        log::debug!("Worker {index} exiting");
    }

    #[inline]
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues `job` on the next free worker.
    pub fn submit<T, F>(&self, job: F) -> Result<ResourceTicket<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut GpuContext) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = flume::bounded(1);
        let timeout = self.fence_timeout;

        let task: Job = Box::new(move |gpu| {
            let result = job(gpu).and_then(|value| {
                let fence = gpu.insert_fence()?;
                let waited = gpu.wait_fence(&fence, timeout);
                gpu.release_fence(fence);
                waited.map(|()| value)
            });
            // The ticket may have been dropped; nobody is waiting then.
            let _ = tx.send(result);
        });

        self.jobs
            .as_ref()
            .ok_or(RenderError::WorkerDisconnected)?
            .send(task)
            .map_err(|_| RenderError::WorkerDisconnected)?;

        Ok(ResourceTicket {
            receiver: rx,
            taken: false,
        })
    }

    /// Compiles and links `keys` on a worker context and reports which
    /// variants build.
    ///
    /// The programs are deleted again before the job finishes. Program
    /// objects are not shared between contexts, so the render context's
    /// [`ShaderCompiler`] still links each variant on first use. The job
    /// surfaces build failures early and warms the driver's shader cache.
    pub fn precompile_variants(&self, keys: Vec<VariantKey>) -> Result<ResourceTicket<PrecompileReport>> {
        self.submit(move |gpu| {
            let mut compiler = ShaderCompiler::new();
            let mut report = PrecompileReport::default();
            for key in &keys {
                match compiler.get_or_compile(gpu, key) {
                    Ok(_) => report.compiled += 1,
                    Err(err) => report.failed.push((key.label(), err)),
                }
            }
            compiler.destroy(gpu);
            Ok(report)
        })
    }
}

impl Drop for ResourceWorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once the queue is drained.
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Resource worker panicked");
            }
        }
    }
}
