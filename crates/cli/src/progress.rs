//! Cargo-style progress output for publish runs.
//!
//! ```text
//!   Inventory 412 files, 18 to upload, 3 to remove
//!   Archiving dist_1.tar.zst (18 files)
//!   Uploading [=========>               ] 12.40 MiB/31.02 MiB dist_1.tar.zst
//!     Deleted old/index.html
//!   Published 20260119.1x2k9f0 in 4.21s
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Status verbs, right-aligned to 12 chars.
pub struct Status;

impl Status {
    pub const INVENTORY: &str = "Inventory";
    pub const ARCHIVING: &str = "Archiving";
    pub const UPLOADING: &str = "Uploading";
    pub const UPLOADED: &str = "Uploaded";
    pub const DELETED: &str = "Deleted";
    pub const FAILED: &str = "Failed";
    pub const PLANNED: &str = "Planned";
    pub const PUBLISHED: &str = "Published";
}

/// Print a cargo-style status line to stderr.
pub fn print_status(status: &str, message: &str) {
    eprintln!("{status:>12} {message}");
}

/// Byte-count bar for one archive upload.
pub fn upload_bar(total_bytes: u64, name: &str) -> ProgressBar {
    let pb = ProgressBar::new(total_bytes);
    let style = ProgressStyle::default_bar()
        .template("{msg:>12} [{bar:25.cyan/dim}] {bytes}/{total_bytes} {prefix:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb.set_message(Status::UPLOADING);
    pb.set_prefix(name.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Run timer for the final summary line.
pub struct RunTimer {
    start: Instant,
}

impl RunTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_str(&self) -> String {
        let elapsed = self.start.elapsed();
        if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        }
    }
}
