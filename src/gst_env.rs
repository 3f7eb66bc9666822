//! Process-wide bootstrap for logging and GStreamer
//!
//! Everything that touches a GStreamer element goes through `init()` first.
//! The guard is a `Once`, so repeated calls from capture, writer and
//! assembler threads are harmless.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize env_logger and GStreamer exactly once.
///
/// Logging failures are ignored (a host application may have installed its
/// own logger already). A GStreamer init failure is logged and left for the
/// first pipeline construction to surface as a hard error.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .try_init();

        match gstreamer::init() {
            Ok(_) => {
                let (major, minor, micro, nano) = gstreamer::version();
                log::info!(
                    "GStreamer initialized (version {}.{}.{}.{})",
                    major, minor, micro, nano
                );
            }
            Err(e) => {
                log::error!("Failed to initialize GStreamer: {}", e);
                log::error!("Capture and container writing will not be available");
            }
        }
    });
}
