pub mod line_ending;
pub mod path_utils;

pub use line_ending::{LineEnding, detect_line_ending, normalize_line_ending};
