//! Fingerprint image acquisition
//!
//! Drives one capture from port opening through to a saved bitmap and
//! reduces every failure to an `AcquisitionError`.

pub mod controller;
pub mod error;

pub use controller::{AcquisitionController, AcquisitionState, CaptureReport};
pub use error::{AcquisitionError, FailureKind};

use std::path::PathBuf;

/// Extension of every saved capture
pub const OUTPUT_EXTENSION: &str = "bmp";

/// Output path for a user-supplied base name.
///
/// `.bmp` is appended unless the name already carries it.
pub fn output_path(base: &str) -> PathBuf {
    let has_extension = std::path::Path::new(base)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(OUTPUT_EXTENSION));

    if has_extension {
        PathBuf::from(base)
    } else {
        PathBuf::from(format!("{}.{}", base, OUTPUT_EXTENSION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_appends_extension() {
        assert_eq!(output_path("myprints"), PathBuf::from("myprints.bmp"));
        assert_eq!(output_path("scans/left.thumb"), PathBuf::from("scans/left.thumb.bmp"));
    }

    #[test]
    fn test_output_path_keeps_existing_extension() {
        assert_eq!(output_path("myprints.bmp"), PathBuf::from("myprints.bmp"));
        assert_eq!(output_path("MYPRINTS.BMP"), PathBuf::from("MYPRINTS.BMP"));
    }
}
