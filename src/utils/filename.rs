//! Safe filename generation utilities

/// Default maximum filename length in bytes
pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 200;

const FALLBACK_NAME: &str = "unnamed_file";

/// Characters rejected by at least one common filesystem
fn is_illegal_char(c: char) -> bool {
    c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

/// Turn an arbitrary title into a filesystem-safe name of at most `max_len` bytes.
///
/// Illegal characters become `_`, whitespace runs collapse to one space and
/// leading/trailing dots or spaces are dropped.
pub fn sanitize_filename(title: &str, max_len: usize) -> String {
    let replaced: String = title
        .chars()
        .map(|c| if is_illegal_char(c) { '_' } else { c })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut safe = trim_edges(&collapsed).to_string();

    if safe.len() > max_len {
        truncate_at_char_boundary(&mut safe, max_len);
        safe = trim_edges(&safe).to_string();
    }

    if safe.is_empty() {
        let mut fallback = FALLBACK_NAME.to_string();
        truncate_at_char_boundary(&mut fallback, max_len);
        return fallback;
    }

    safe
}

/// Convert a title to a safe filename with the given extension
pub fn to_safe_filename(title: &str, extension: &str) -> String {
    let ext = extension.trim_start_matches('.');
    if ext.is_empty() {
        return sanitize_filename(title, DEFAULT_MAX_FILENAME_LENGTH);
    }

    let ext = sanitize_filename(ext, 16);
    let stem_budget = DEFAULT_MAX_FILENAME_LENGTH.saturating_sub(ext.len() + 1);
    format!("{}.{}", sanitize_filename(title, stem_budget), ext)
}

fn trim_edges(name: &str) -> &str {
    name.trim_matches(|c: char| c == '.' || c == ' ')
}

fn truncate_at_char_boundary(s: &mut String, max_len: usize) {
    if s.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_illegal_characters() {
        assert_eq!(
            sanitize_filename("Dandadan: Episode 12 <HD>", 200),
            "Dandadan_ Episode 12 _HD_"
        );
        assert_eq!(sanitize_filename("a/b\\c|d?e*f\"g", 200), "a_b_c_d_e_f_g");
        assert_eq!(sanitize_filename("tab\there\x07bell", 200), "tab_here_bell");
    }

    #[test]
    fn test_sanitize_collapses_whitespace_and_trims() {
        assert_eq!(sanitize_filename("  One   Piece  ", 200), "One Piece");
        assert_eq!(sanitize_filename("...hidden...", 200), "hidden");
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize_filename("", 200), "unnamed_file");
        assert_eq!(sanitize_filename("   ", 200), "unnamed_file");
        assert_eq!(sanitize_filename("", 4), "unna");
    }

    #[test]
    fn test_sanitize_clamps_length_on_char_boundary() {
        let title = "進撃の巨人".repeat(40);
        for max in [1, 7, 50, 200] {
            let safe = sanitize_filename(&title, max);
            assert!(safe.len() <= max, "{} > {}", safe.len(), max);
            assert!(safe.chars().all(|c| !is_illegal_char(c)));
        }
    }

    #[test]
    fn test_sanitize_never_emits_illegal_characters() {
        let nasty = "<>:\"/\\|?*\x00\x1f title \x7f";
        let safe = sanitize_filename(nasty, 200);
        assert!(!safe.chars().any(|c| "<>:\"/\\|?*".contains(c) || c.is_control()));
    }

    #[test]
    fn test_to_safe_filename() {
        assert_eq!(
            to_safe_filename("Test Video: Title", "mp4"),
            "Test Video_ Title.mp4"
        );
        assert_eq!(to_safe_filename("", ".mp4"), "unnamed_file.mp4");
        assert_eq!(to_safe_filename("plain", ""), "plain");

        let long = "x".repeat(500);
        let name = to_safe_filename(&long, "mkv");
        assert!(name.len() <= DEFAULT_MAX_FILENAME_LENGTH);
        assert!(name.ends_with(".mkv"));
    }
}
