use std::sync::Arc;

use futures::future;
use log::{debug, error, info, warn};
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Axis, Slice};
use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    runtime::{self, Runtime},
    sync::{mpsc, oneshot},
    task::{self, JoinHandle},
};

use super::{Executor, shard::shards};
use crate::{
    Gradient, MlErr, Params, Result,
    arch::{Sequential, layers::Mode},
    dataset::Dataset,
    optimization::{BatchObjective, Objective},
};

#[derive(Debug, Clone, Copy)]
enum Pass {
    Loss,
    LossAndGrad,
}

/// A shard of a batch sent to a worker.
struct Job {
    params: Arc<Params>,
    x: ArrayD<f32>,
    y: Array2<f32>,
    seed: u64,
    pass: Pass,
    reply: oneshot::Sender<Result<Partial>>,
}

/// A worker's result, weighted by the size of its shard.
struct Partial {
    loss: f32,
    grad: Option<Gradient>,
    n: usize,
}

struct Worker {
    jobs: mpsc::Sender<Job>,
    task: JoinHandle<()>,
}

/// Splits every batch among a pool of workers, each owning a replica of the model.
///
/// Workers are long lived tasks on a dedicated runtime. Every step they receive a read only
/// snapshot of the trainer's parameters and a contiguous shard of the batch, run the passes on
/// the blocking pool and send back their loss and gradient multiplied by the shard's size. The
/// sum of those divided by the batch size is the batch mean.
///
/// Workers never see each other, the model is only written by the trainer.
pub struct Ensemble {
    runtime: Option<Runtime>,
    workers: Vec<Worker>,
    batch_size: usize,
}

impl Ensemble {
    /// Starts a pool of `num_workers` workers with replicas of `model`.
    ///
    /// # Arguments
    /// * `model` - The model whose architecture is replicated.
    /// * `num_workers` - The amount of workers.
    /// * `batch_size` - The batch size used to refresh normalisation statistics.
    pub fn new(model: &Sequential, num_workers: usize, batch_size: usize) -> Result<Self> {
        if num_workers == 0 || batch_size == 0 {
            return Err(MlErr::InvalidConfig(format!(
                "a worker pool needs workers and a batch size, got {num_workers} and {batch_size}"
            )));
        }

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(num_workers)
            .thread_name("ensemble-worker")
            .enable_all()
            .build()?;

        let workers = (0..num_workers)
            .map(|worker_id| {
                let (jobs, rx) = mpsc::channel(1);
                let task = runtime.spawn(serve(worker_id, model.clone(), rx));
                Worker { jobs, task }
            })
            .collect();

        info!(workers = num_workers; "worker pool started");

        Ok(Self {
            runtime: Some(runtime),
            workers,
            batch_size,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    fn scatter(
        &self,
        model: &Sequential,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        seed: u64,
        pass: Pass,
    ) -> Result<(f32, Option<Gradient>)> {
        let Some(runtime) = &self.runtime else {
            return Err(MlErr::InvalidConfig("the worker pool is shut down".into()));
        };

        let params = Arc::new(model.parameters());
        let futs = shards(y.nrows(), self.workers.len()).map(|(worker_id, range)| {
            let jobs = self.workers[worker_id].jobs.clone();
            let (reply, done) = oneshot::channel();
            let job = Job {
                params: Arc::clone(&params),
                x: x.slice_axis(Axis(0), Slice::from(range.clone())).to_owned(),
                y: y.slice_axis(Axis(0), Slice::from(range)).to_owned(),
                seed: worker_seed(seed, worker_id),
                pass,
                reply,
            };

            async move {
                let lost = MlErr::WorkerLost { worker_id };
                if jobs.send(job).await.is_err() {
                    return Err(lost);
                }
                match done.await {
                    Ok(partial) => partial,
                    Err(_) => Err(lost),
                }
            }
        });

        let partials = runtime.block_on(future::try_join_all(futs))?;
        gather(partials)
    }
}

impl Executor for Ensemble {
    fn loss(
        &mut self,
        model: &mut Sequential,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        seed: u64,
    ) -> Result<f32> {
        let (loss, _) = self.scatter(model, x, y, seed, Pass::Loss)?;
        Ok(loss)
    }

    fn loss_and_grad(
        &mut self,
        model: &mut Sequential,
        x: ArrayViewD<'_, f32>,
        y: ArrayView2<'_, f32>,
        seed: u64,
    ) -> Result<(f32, Gradient)> {
        let (loss, grad) = self.scatter(model, x, y, seed, Pass::LossAndGrad)?;
        let grad = grad.ok_or(MlErr::MissingGradient { layer: "ensemble" })?;
        Ok((loss, grad))
    }

    /// The workers' forward passes never reach the trainer's model, so its batch norm running
    /// statistics are recomputed with a training mode pass over the training set.
    fn end_epoch(&mut self, model: &mut Sequential, train: &Dataset) -> Result<()> {
        if !model.has_batch_norm() {
            return Ok(());
        }

        let mut rng = StdRng::seed_from_u64(0);
        for (x, _) in train.batches(self.batch_size)? {
            model.forward(x, &mut Mode::Train(&mut rng))?;
        }
        model.clear_cache();

        debug!(examples = train.len(); "refreshed batch norm statistics");
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };

        // Dropping the senders ends every worker's loop.
        let tasks: Vec<JoinHandle<()>> = self.workers.drain(..).map(|w| w.task).collect();
        let joined = runtime.block_on(future::join_all(tasks));
        let crashed = joined.iter().filter(|res| res.is_err()).count();
        runtime.shutdown_background();

        if crashed > 0 {
            warn!(crashed = crashed; "some workers crashed before shutting down");
        }
        info!("worker pool shut down");

        Ok(())
    }
}

impl Drop for Ensemble {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!(error:% = err; "failed to shut down the worker pool");
        }
    }
}

fn worker_seed(seed: u64, worker_id: usize) -> u64 {
    seed.wrapping_add((worker_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn gather(partials: Vec<Partial>) -> Result<(f32, Option<Gradient>)> {
    let n: usize = partials.iter().map(|p| p.n).sum();
    if n == 0 {
        return Err(MlErr::InvalidConfig("can't run a pass over an empty batch".into()));
    }

    let mut loss = 0.;
    let mut grad: Option<Gradient> = None;

    for partial in partials {
        loss += partial.loss;
        grad = match (grad, partial.grad) {
            (Some(mut acc), Some(g)) => {
                acc.scaled_add(1., &g)?;
                Some(acc)
            }
            (None, g) => g,
            (acc, None) => acc,
        };
    }

    let n = n as f32;
    Ok((loss / n, grad.map(|g| g / n)))
}

async fn serve(worker_id: usize, mut replica: Sequential, mut jobs: mpsc::Receiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let Job {
            params,
            x,
            y,
            seed,
            pass,
            reply,
        } = job;

        let computed = task::spawn_blocking(move || {
            let partial = compute(&mut replica, &params, x.view(), y.view(), seed, pass);
            (replica, partial)
        })
        .await;

        match computed {
            Ok((back, partial)) => {
                replica = back;
                // The trainer may have given up on this step already.
                let _ = reply.send(partial);
            }
            Err(err) => {
                error!(worker_id = worker_id, error:% = err; "worker crashed");
                return;
            }
        }
    }

    debug!(worker_id = worker_id; "worker stopped");
}

fn compute(
    replica: &mut Sequential,
    params: &Params,
    x: ArrayViewD<'_, f32>,
    y: ArrayView2<'_, f32>,
    seed: u64,
    pass: Pass,
) -> Result<Partial> {
    replica.set_parameters(params)?;

    let n = y.nrows();
    let weight = n as f32;
    let mut objective = BatchObjective::new(x, y, seed);

    match pass {
        Pass::Loss => Ok(Partial {
            loss: objective.loss(replica)? * weight,
            grad: None,
            n,
        }),
        Pass::LossAndGrad => {
            let (loss, grad) = objective.loss_and_grad(replica)?;
            Ok(Partial {
                loss: loss * weight,
                grad: Some(grad * weight),
                n,
            })
        }
    }
}
