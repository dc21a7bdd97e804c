//! A tiny extension-based MIME-category hint, feeding the compressor's
//! compressibility heuristic (§4.3). Deliberately not a full MIME-sniffing
//! library: the compressor only distinguishes a handful of broad
//! categories, and falls back to "no hint" (always attempt compression)
//! for anything unrecognized.

use std::path::Path;

/// Guess a coarse MIME category from a file's extension. Returns `None` for
/// unrecognized or missing extensions, which the compressor treats as
/// "attempt compression anyway".
pub fn category_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "txt" | "md" | "log" | "ini" | "cfg" | "conf" => "text",
        "rs" | "c" | "h" | "cpp" | "py" | "js" | "ts" | "go" | "java" | "sh" => "source",
        "json" => "json",
        "xml" | "html" | "htm" => "xml",
        "csv" | "tsv" => "csv",
        "jpg" | "jpeg" | "png" | "gif" | "zip" | "gz" | "mp4" | "mp3" => "binary",
        _ => return None,
    })
}
