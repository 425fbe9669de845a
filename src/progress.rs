// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Progress reporting and cancellation.
//!
//! Long-running operations poll [`ProgressHandler::should_abort`] between
//! outer-loop iterations (per frame, per peak, per solver iteration); on
//! abort they drop partial results and return an empty output. The CLI wires
//! the indicatif implementation in; library callers and tests use the silent
//! one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

pub trait ProgressHandler: Send + Sync {
    fn should_abort(&self) -> bool {
        false
    }
    fn begin(&self, _label: &str, _total: u64) {}
    fn advance(&self, _n: u64) {}
    fn finish(&self, _message: &str) {}
}

/// No reporting, never aborts.
#[derive(Default)]
pub struct SilentProgress;

impl ProgressHandler for SilentProgress {}

/// Silent handler with an externally triggered abort flag.
#[derive(Clone, Default)]
pub struct AbortFlag {
    flag: Arc<AtomicBool>,
}

impl AbortFlag {
    pub fn new() -> AbortFlag {
        AbortFlag::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

impl ProgressHandler for AbortFlag {
    fn should_abort(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Terminal progress bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(visible: bool) -> BarProgress {
        let bar = ProgressBar::with_draw_target(
            None,
            if visible {
                ProgressDrawTarget::stdout()
            } else {
                ProgressDrawTarget::hidden()
            },
        );
        BarProgress { bar }
    }
}

impl ProgressHandler for BarProgress {
    fn begin(&self, label: &str, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_message(label.to_string());
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg:17}: [{wide_bar:.blue}] {pos}/{len} ({elapsed_precise}<{eta_precise})")
                .unwrap()
                .progress_chars("=> "),
        );
    }

    fn advance(&self, n: u64) {
        self.bar.inc(n);
    }

    fn finish(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}
