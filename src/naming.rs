/// Marker some map apps append to names of deleted or rejected points.
pub const ICON_MARKER: char = '❌';
/// Appended before the extension to keep later images of a placemark apart.
pub const DISAMBIGUATION_SUFFIX: &str = "..";
pub const CANONICAL_EXTENSION: &str = "jpg";

const UNSAFE_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Removes the icon marker together with the whitespace around it.
pub fn strip_marker(text: &str) -> String {
    if !text.contains(ICON_MARKER) {
        return text.trim().to_string();
    }

    let mut out = String::with_capacity(text.len());
    for part in text.split(ICON_MARKER) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(part);
    }
    out
}

/// Replaces characters that are unsafe in file names with `_` and
/// collapses whitespace runs to one space.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `"<name> <suffix>"` with markers stripped, before any extension.
pub fn canonical_stem(placemark_name: &str, suffix: &str) -> String {
    let name = strip_marker(placemark_name);
    let suffix = strip_marker(suffix);
    format!("{} {}", name, suffix).trim().to_string()
}

/// Target file name with `repeats` disambiguation suffixes before the
/// extension.
pub fn canonical_file_name(stem: &str, repeats: usize) -> String {
    let marker = DISAMBIGUATION_SUFFIX.repeat(repeats);
    sanitize_file_name(&format!("{}{}.{}", stem, marker, CANONICAL_EXTENSION))
}
