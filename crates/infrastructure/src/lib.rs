//! 基于文件系统的配置读写与监听实现

pub mod discovery;
pub mod formats;
pub mod loader;
pub mod saver;
pub mod watcher;

pub use discovery::FileDiscovery;
pub use formats::{ConfigFormat, FormatError, FormatRegistry, JsonFormat, TomlFormat, YamlFormat};
pub use loader::FileConfigLoader;
pub use saver::FileConfigSaver;
pub use watcher::NotifyConfigWatcher;
