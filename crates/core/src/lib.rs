pub mod config;
pub mod error;
pub mod inference;
pub mod maintenance;
pub mod reading;

pub use config::Config;
pub use error::*;
pub use inference::*;
pub use maintenance::*;
pub use reading::*;
