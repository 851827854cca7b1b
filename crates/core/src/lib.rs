//! 热重载配置核心库
//!
//! 分层配置文件的合并、环境变量替换、变更检测、快照回滚，以及加载过程的
//! 重试、熔断与降级。文件系统相关的实现位于 `hotconf-infrastructure`。

pub mod cache;
pub mod debounce;
pub mod diff;
pub mod env_resolver;
pub mod errors;
pub mod events;
pub mod manager;
pub mod path;
pub mod resilience;
pub mod safe_ops;
pub mod snapshot;
pub mod traits;
pub mod validation;

pub use diff::{ChangeDetector, ChangeKind, ChangeRecord, PathFilter};
pub use env_resolver::{EnvProvider, EnvResolver, EnvResolverOptions, ProcessEnv};
pub use errors::*;
pub use events::{ConfigEvent, EventBus, EventSummary};
pub use manager::{ConfigManager, ConfigManagerBuilder, ConfigManagerOptions, ManagerStats, ReloadOutcome};
pub use path::ConfigPath;
pub use snapshot::{Snapshot, SnapshotComparison, SnapshotManager};
pub use traits::*;
pub use validation::{BasicConfigValidator, ConfigValidator, ValidatorRegistry, ValueType};
