//! CLI command implementations

pub mod config;
pub mod inspect;
pub mod prepare;
pub mod run;

pub use config::execute as config;
pub use inspect::execute as inspect;
pub use prepare::execute as prepare;
pub use run::execute as run;
