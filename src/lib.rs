pub mod acquisition;
pub mod cli;
pub mod devices;
pub mod error;

pub use acquisition::data::{DerivedRecord, Measurement};
pub use acquisition::{LocalConfig, RemoteConfig, SourceConfig, get_data, get_data_from};
pub use error::{EnvError, Result};
