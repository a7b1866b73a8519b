#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    Crlf,
    Mixed,
}

pub fn detect_line_ending(content: &str) -> LineEnding {
    let crlf_count = content.matches("\r\n").count();
    let lf_count = content.matches('\n').count() - crlf_count;

    match (crlf_count > 0, lf_count > 0) {
        (true, true) => LineEnding::Mixed,
        (true, false) => LineEnding::Crlf,
        // No line endings at all counts as LF
        (false, _) => LineEnding::Lf,
    }
}

/// Rewrite every line break in `content` to `target`.
///
/// Mixed input is resolved too, so the result never contains both conventions.
pub fn normalize_line_ending(content: &str, target: LineEnding) -> String {
    match target {
        LineEnding::Lf | LineEnding::Mixed => content.replace("\r\n", "\n"),
        LineEnding::Crlf => content.replace("\r\n", "\n").replace('\n', "\r\n"),
    }
}
