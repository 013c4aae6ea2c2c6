use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Display width of a string in terminal columns (CJK and emoji count as 2).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncates a string to `max_width` terminal columns, appending "..." when
/// text is cut.
///
/// Widths of 3 or less have no room for the ellipsis, so the longest prefix
/// that fits is returned as-is. Returns `Cow::Borrowed` when nothing is cut.
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let budget = if max_width <= ELLIPSIS_WIDTH {
        max_width
    } else {
        max_width - ELLIPSIS_WIDTH
    };

    let mut used = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        end = idx + c.len_utf8();
    }

    if max_width <= ELLIPSIS_WIDTH {
        Cow::Owned(s[..end].to_string())
    } else {
        Cow::Owned(format!("{}{}", &s[..end], ELLIPSIS))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    /// Saw ESC, waiting for the introducer byte.
    Start,
    /// Inside `ESC [` until a final byte in 0x40..=0x7E.
    Csi,
    /// Inside `ESC ]` until BEL or `ESC \`.
    Osc,
    /// Saw ESC inside an OSC body; `\` terminates.
    OscEsc,
}

/// SEC-014: Strip control characters and ANSI escape sequences from a
/// user-supplied name.
///
/// Names are single-line values, so unlike free text this also removes tab,
/// newline and carriage return. Returns `Cow::Borrowed` for clean input.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(char::is_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut state = Escape::None;

    for c in s.chars() {
        state = match state {
            Escape::None if c == '\x1b' => Escape::Start,
            Escape::None if c.is_control() => Escape::None,
            Escape::None => {
                out.push(c);
                Escape::None
            }
            Escape::Start => match c {
                '[' => Escape::Csi,
                ']' => Escape::Osc,
                '\x1b' => Escape::Start,
                // Bare ESC: drop it but keep the following character.
                c if c.is_control() => Escape::None,
                c => {
                    out.push(c);
                    Escape::None
                }
            },
            Escape::Csi if ('\x40'..='\x7e').contains(&c) => Escape::None,
            Escape::Csi => Escape::Csi,
            Escape::Osc if c == '\x07' => Escape::None,
            Escape::Osc if c == '\x1b' => Escape::OscEsc,
            Escape::Osc => Escape::Osc,
            Escape::OscEsc if c == '\\' => Escape::None,
            Escape::OscEsc => Escape::Osc,
        };
    }

    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_fits_is_borrowed() {
        assert!(matches!(truncate_to_width("Short", 10), Cow::Borrowed(_)));
        assert_eq!(truncate_to_width("12345", 5), "12345");
    }

    #[test]
    fn test_truncate_ascii() {
        assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
        assert_eq!(truncate_to_width("Testing", 4), "T...");
    }

    #[test]
    fn test_truncate_cjk() {
        // Each CJK character is two columns wide.
        assert_eq!(truncate_to_width("日本語テスト", 7), "日本...");
        assert_eq!(truncate_to_width("日本語", 3), "日");
    }

    #[test]
    fn test_truncate_narrow_widths() {
        assert_eq!(truncate_to_width("Test", 0), "");
        assert_eq!(truncate_to_width("Test", 1), "T");
        assert_eq!(truncate_to_width("Test", 3), "Tes");
    }

    #[test]
    fn test_strip_clean_text_returns_borrowed() {
        assert!(matches!(strip_control_chars("Matematyka"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_removes_line_breaks_and_tabs() {
        assert_eq!(strip_control_chars("Fizyka\n\tklasa 7\r"), "Fizykaklasa 7");
    }

    #[test]
    fn test_strip_ansi_color_codes() {
        assert_eq!(strip_control_chars("\x1b[31mRed\x1b[0m"), "Red");
    }

    #[test]
    fn test_strip_osc_sequences() {
        assert_eq!(strip_control_chars("a\x1b]0;title\x07b"), "ab");
        assert_eq!(strip_control_chars("a\x1b]8;;x\x1b\\b"), "ab");
    }

    #[test]
    fn test_strip_bare_esc_keeps_next_char() {
        assert_eq!(strip_control_chars("a\x1bb"), "ab");
    }

    #[test]
    fn test_strip_del() {
        assert_eq!(strip_control_chars("a\x7fb"), "ab");
    }
}
