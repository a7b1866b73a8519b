/// Exit codes for toolbridge
///
/// These let scripts tell a failed tool run apart from a problem in toolbridge
/// itself.
/// Success - The tool ran and reported no failure
pub const SUCCESS: i32 = 0;

/// Invocation failed - The tool could not be launched, its channel broke, or it
/// exited non-zero
pub const INVOCATION_FAILED: i32 = 1;

/// Tool error - Configuration error, file access error, or a fault inside an
/// in-process module
pub const TOOL_ERROR: i32 = 2;

/// Helper functions for consistent exit behavior
pub mod exit {
    use super::{INVOCATION_FAILED, SUCCESS, TOOL_ERROR};

    /// Exit with success code (0)
    pub fn success() -> ! {
        std::process::exit(SUCCESS);
    }

    /// Exit with invocation failed code (1)
    pub fn invocation_failed() -> ! {
        std::process::exit(INVOCATION_FAILED);
    }

    /// Exit with tool error code (2)
    pub fn tool_error() -> ! {
        std::process::exit(TOOL_ERROR);
    }
}
