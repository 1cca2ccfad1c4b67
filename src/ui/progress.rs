//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Per-file progress for a decryption batch.
///
/// An indicatif bar in interactive mode; one line per file otherwise.
/// The bar appears on `start`, once the batch size is known. Cheap to clone
/// into the decryptor's progress callback.
#[derive(Clone)]
pub struct DecryptProgress {
    fancy: bool,
    bar: Arc<OnceLock<ProgressBar>>,
}

impl DecryptProgress {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            fancy: ctx.use_fancy_output(),
            bar: Arc::new(OnceLock::new()),
        }
    }

    /// Show the bar for `total` files; later calls are ignored
    pub fn start(&self, total: u64) {
        if !self.fancy {
            return;
        }
        self.bar.get_or_init(|| {
            let bar = ProgressBar::new(total);
            let style = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} Decrypting {bar:24.cyan/dim} {pos}/{len} {msg:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("━╸─");
            bar.set_style(style);
            bar.set_message("waiting for key release");
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
    }

    /// Record one finished file
    pub fn on_file(&self, path: &Path, ok: bool) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match self.bar.get() {
            Some(bar) => {
                bar.inc(1);
                bar.set_message(name);
            }
            None if ok => println!("  {} {}", style("[OK]").green(), name),
            None => println!("  {} {}", style("[FAIL]").red(), name),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = self.bar.get() {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
