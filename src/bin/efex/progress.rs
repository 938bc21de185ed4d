use failure::Error;
use indicatif::{ProgressBar, ProgressStyle};

/// Creates the progress bar shown while moving `total` bytes.
pub(crate) fn transfer_bar(label: &'static str, total: u64) -> Result<ProgressBar, Error> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} \
                 ({bytes_per_sec}, {eta})",
            )?
            .progress_chars("#>-"),
    );
    pb.set_message(label);
    Ok(pb)
}
