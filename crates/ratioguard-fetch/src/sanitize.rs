//! Title-to-filename sanitisation for written `.torrent` files.

/// Strip every character not in `[a-zA-Z0-9 _-]` and collapse runs of spaces
/// into one, trimming the result. The hash stored for a torrent is always
/// computed from its bytes, never from this name — this only controls what
/// ends up on disk.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_space = false;

    for ch in title.chars() {
        let allowed = ch.is_ascii_alphanumeric() || ch == ' ' || ch == '_' || ch == '-';
        if !allowed {
            continue;
        }
        if ch == ' ' {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_disallowed_characters() {
        assert_eq!(
            sanitize_title("Show: Season/Episode [1080p]!"),
            "Show Season Episode 1080p"
        );
    }

    #[test]
    fn collapses_runs_of_spaces() {
        assert_eq!(sanitize_title("a    b"), "a b");
    }

    #[test]
    fn strips_tabs_and_newlines_without_inserting_a_space() {
        assert_eq!(sanitize_title("a\tb\nc"), "abc");
    }

    #[test]
    fn trims_leading_and_trailing_space() {
        assert_eq!(sanitize_title("  leading and trailing  "), "leading and trailing");
    }

    #[test]
    fn keeps_underscores_and_hyphens() {
        assert_eq!(sanitize_title("my_file-name"), "my_file-name");
    }
}
