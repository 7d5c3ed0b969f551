use indicatif::{ProgressBar, ProgressStyle};

/// Bar positions per 100%, so one-decimal percentages still move the bar.
pub const PROGRESS_SCALE: u64 = 1000;

/// Create a progress bar for one transfer session.
///
/// The bar is driven by percentages rather than bytes because the shell
/// only ever sees progress events, never the session's byte counters.
/// The caller adds it to a `MultiProgress`, which decides where it renders.
pub fn create_session_progress() -> ProgressBar {
    let pb = ProgressBar::new(PROGRESS_SCALE);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}",
        )
        .expect("static progress template is valid")
        .progress_chars("=>-"),
    );
    pb
}

/// Map a percentage in `0.0..=100.0` onto the bar's scale.
pub fn position_for(percent: f64) -> u64 {
    let clamped = percent.clamp(0.0, 100.0);
    (clamped * PROGRESS_SCALE as f64 / 100.0).round() as u64
}
