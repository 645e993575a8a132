use indicatif::{ProgressBar, ProgressStyle};
use veilsnap_core::ProgressReporter;

/// Byte-level progress bar for uploads and downloads.
pub struct TransferBar {
    bar: ProgressBar,
}

impl TransferBar {
    pub fn new(message: &'static str) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {bytes:>10}/{total_bytes:10} {msg}")
                .unwrap(),
        );
        bar.set_message(message);
        Self { bar }
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }
}

impl ProgressReporter for TransferBar {
    fn begin(&self, total_bytes: u64) {
        self.bar.set_length(total_bytes);
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn advance(&self, bytes: u64) {
        self.bar.inc(bytes);
    }
}
