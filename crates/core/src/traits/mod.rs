pub mod config_io;
pub mod watch;

pub use config_io::*;
pub use watch::*;
