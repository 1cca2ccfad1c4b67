//! Terminal output for the CLI
//!
//! `cliclack` steps and `indicatif` bars in interactive terminals, plain
//! prefixed lines when stdout is piped or a CI runner is detected.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, remark, section, step_info, step_ok_detail, step_warn_hint,
};
pub use progress::DecryptProgress;
