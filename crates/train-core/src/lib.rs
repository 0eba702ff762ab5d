//! Release train core library
//!
//! Webhook classification, manager dispatch, result aggregation, and the
//! git workflows (backmerge, train departure, manifest upkeep, conflict
//! checks) that run behind them.

pub mod backmerge;
pub mod config;
pub mod conflict_check;
pub mod error;
pub mod event;
pub mod fakes;
pub mod github;
pub mod manager;
pub mod manifest;
pub mod metrics;
pub mod notify;
pub mod obs;
pub mod queue;
pub mod service;
pub mod signature;
pub mod telemetry;
pub mod train;

pub use config::{Environment, PlatformConfig, QueueConfig, TrainConfig};
pub use error::{
    ApiError, ConfigError, ContractViolation, NotifyError, QueueError, RegistryError, Result,
    TrainError,
};
pub use event::{classify, EventShape, WebhookEvent};
pub use github::{ApiResult, GitHubApi};

pub use manager::{
    aggregate, default_registry, Channel, DispatchMode, Dispatcher, HttpCategories, Manager,
    ManagerContext, ManagerRegistry, ManagerResult, VerdictStatus, WebhookStatus,
};

pub use backmerge::{BackmergeManager, BackmergeReport, MergeOutcome};
pub use conflict_check::ConflictCheckManager;
pub use manifest::changelog::{ChangelogWriter, ManifestChangelog};
pub use manifest::tag::{BumpLevel, GitTagger, ReleaseTagger};
pub use manifest::update::ManifestUpdateManager;
pub use manifest::Manifest;
pub use train::{TrainManager, TrainPlan, TrainRun};

pub use notify::{ChatMessage, DeliveryReport, NotificationRouter, Notifier};
pub use queue::{Consumed, MemoryQueue, MessageQueue, QueueConsumer, SpoolQueue};
pub use service::{WebhookResponse, WebhookService};
pub use signature::{HookRejection, HookRequest, SecureHook};

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// Release train version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
