pub mod resolver;
pub mod run;
pub mod scan;
pub mod scheduler;
pub mod uploader;

#[cfg(test)]
pub(crate) mod fakes;

pub use resolver::FolderResolver;
pub use run::{RunError, SyncPass, SyncRunResult, SyncRunner};
pub use scheduler::{Scheduler, SchedulerState, SchedulerStatus, Timer, TokioTimer};
pub use uploader::{FileUploader, UploadOutcome, UploadTurn};
