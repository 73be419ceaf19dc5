//! Text preparation for TTS: strip chat markup before synthesis.
//!
//! Pure functions, no I/O.

use regex::Regex;
use std::sync::LazyLock;

// Compiled once.
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static RE_BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static RE_ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*(.*?)\*").unwrap());
static RE_INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`(.*?)`").unwrap());
static RE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());

/// Strip markup from an assistant message so it reads naturally when spoken.
///
/// The passes run in a fixed order: HTML-like tags, bold, italic, inline code,
/// links, then surrounding whitespace. An empty result means there is nothing
/// to speak and the caller must skip synthesis.
pub fn sanitize(text: &str) -> String {
    let c = RE_TAG.replace_all(text, "");
    let c = RE_BOLD.replace_all(&c, "$1");
    let c = RE_ITALIC.replace_all(&c, "$1");
    let c = RE_INLINE_CODE.replace_all(&c, "$1");
    let c = RE_LINK.replace_all(&c, "$1");
    c.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bold_and_links_together() {
        assert_eq!(sanitize("Hi **bold** [link](url)"), "Hi bold link");
    }

    #[test]
    fn plain_text_is_only_trimmed() {
        for s in [
            "Hallo!",
            "  Wie kann ich helfen?  ",
            "\n3 + 4 = 7\t",
            "",
            "Sätze mit Umlauten: äöü ß.",
        ] {
            assert_eq!(sanitize(s), s.trim(), "input: {s:?}");
        }
    }

    #[test]
    fn strips_html_tags() {
        assert_eq!(sanitize("<p>Hallo <b>Welt</b></p>"), "Hallo Welt");
    }

    #[test]
    fn strips_italic() {
        assert_eq!(sanitize("this is *italic* text"), "this is italic text");
    }

    #[test]
    fn keeps_inline_code_content() {
        assert_eq!(sanitize("run `cargo test` now"), "run cargo test now");
    }

    #[test]
    fn bold_runs_before_italic() {
        // A bold span must not be split into two italic markers.
        assert_eq!(sanitize("**a** and *b*"), "a and b");
    }

    #[test]
    fn tags_removed_before_link_collapse() {
        assert_eq!(
            sanitize("see [<i>docs</i>](https://example.com)"),
            "see docs"
        );
    }

    #[test]
    fn markup_only_sanitizes_to_empty() {
        assert_eq!(sanitize("<br/>"), "");
        assert_eq!(sanitize("  <div></div>  "), "");
    }

    #[test]
    fn does_not_cross_lines() {
        // `.` does not match newlines, so an unclosed marker stays put.
        assert_eq!(sanitize("*open\nclose*"), "*open\nclose*");
    }
}
