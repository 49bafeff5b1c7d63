//! The publish scheduling engine.
//!
//! Turns approved forum posts into platform publish jobs per destination
//! account, honoring each account's trigger policy (immediate, scheduled
//! time-of-day, batch-count carousel). All coordination between concurrent
//! dispatches, workers, and the recovery sweep goes through the
//! `social_posts` / `carousel_groups` rows in `sopub-db`; nothing is held
//! in process memory.
//!
//! Control flow: [`Dispatcher`] → [`prepare`] → [`TriggerRouter`] →
//! [`groups::GroupManager`] → [`queue`] → [`worker::PublishWorker`] →
//! platform. [`recovery::RecoveryScanner`] runs on a timer and re-enters
//! the group-manager/worker paths for stuck or time-due groups.

pub mod caption;
pub mod dispatcher;
pub mod error;
pub mod groups;
pub mod prepare;
pub mod queue;
pub mod recovery;
pub mod trigger;
pub mod worker;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{ContentErrorKind, ContentGenerationError, EngineError, PublishError};
pub use prepare::{ContentPreparer, HttpContentPreparer, PreparerWithRetry, RenderInput};
pub use queue::{InMemoryQueue, Job, JobQueue, JobStream, QueueError};
pub use recovery::{RecoveryScanner, SweepReport};
pub use trigger::{RouteOutcome, TriggerRouter};
pub use worker::{retry_delay, HttpPlatformPublisher, PlatformPublisher, PublishWorker, WorkerConfig};
