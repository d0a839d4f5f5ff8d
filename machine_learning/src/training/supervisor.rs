use std::path::PathBuf;

use log::{info, warn};

use super::{Trainer, TrainingResult, execution::Executor};
use crate::{MlErr, Result};

/// Trains until success, resuming every failed attempt from its last checkpoint.
///
/// A run may be restarted `max_restarts` times, after that the last failure is returned as
/// `MlErr::RestartBudgetExhausted`. The trainer is shut down before returning, whatever the
/// outcome.
///
/// # Returns
/// The checkpoint of the successful attempt.
pub fn supervise<E: Executor>(trainer: &mut Trainer<E>) -> Result<PathBuf> {
    let outcome = attempts(trainer);

    match (trainer.shutdown(), outcome) {
        (Err(err), Ok(_)) => Err(err),
        (Err(err), Err(failure)) => {
            warn!(error:% = err; "failed to shut down the trainer");
            Err(failure)
        }
        (Ok(()), outcome) => outcome,
    }
}

fn attempts<E: Executor>(trainer: &mut Trainer<E>) -> Result<PathBuf> {
    let max_restarts = trainer.parameters().max_restarts;
    let mut restarts = 0;
    let mut result = trainer.train()?;

    loop {
        let (reason, checkpoint, resume_epoch) = match result {
            TrainingResult::Successful { checkpoint } => {
                info!(restarts = restarts, checkpoint:% = checkpoint.display(); "training succeeded");
                return Ok(checkpoint);
            }
            TrainingResult::Failed {
                reason,
                checkpoint,
                resume_epoch,
            } => (reason, checkpoint, resume_epoch),
        };

        if restarts == max_restarts {
            return Err(MlErr::RestartBudgetExhausted {
                restarts,
                reason: reason.to_string(),
            });
        }

        restarts += 1;
        trainer.next_attempt();
        warn!(
            restart = restarts,
            max_restarts = max_restarts,
            resume_epoch = resume_epoch,
            reason:% = reason;
            "restarting training"
        );

        result = match checkpoint {
            Some(checkpoint) => trainer.resume(resume_epoch, &checkpoint)?,
            None => trainer.train()?,
        };
    }
}
