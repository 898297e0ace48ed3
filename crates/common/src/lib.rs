pub mod condition;
pub mod config;
pub mod error;
pub mod session;
pub mod types;

pub use condition::ConditionClient;
pub use config::Config;
pub use error::{Error, Result};
pub use session::{Credentials, SessionProvider, StaticSession};
pub use types::*;
