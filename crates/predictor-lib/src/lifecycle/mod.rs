//! Model lifecycle: scheduled retraining, periodic tuning and serving
//!
//! [`ModelOrchestrator`] owns the forecaster and detector and drives them
//! from a [`JobScheduler`] with coalescing interval jobs.

mod jobs;
mod orchestrator;

pub use jobs::{plan_firing, FiringPlan, JobScheduler, JobSpec, JobStatus, SchedulerStatus};
pub use orchestrator::{
    ModelOrchestrator, SchedulerConfig, TrainingOutcome, TrainingReport, TRAINING_JOB, TUNING_JOB,
};
