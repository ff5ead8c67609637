//! Everything that talks to, or interprets, the external job scheduler.
//!
//! - [`client`]: runs the list/submit/cancel commands and captures output
//! - [`job_list`]: fixed-column parser for the job table
//! - [`request`]: submission requests and the commands built from them

pub mod client;
pub mod job_list;
pub mod request;

pub use client::{CommandOutput, SchedulerClient, SlurmClient};
pub use job_list::{parse_job_list, JobRecord};
pub use request::{
    build_local_launch, build_submit_command, normalize_env, parse_assignments, AllocationMode,
    LaunchMode, LocalLaunch, SubmissionRequest, SubmitCommand,
};
