// clanwarden/src/detector/link.rs
//
// URL-like pattern matcher. A match is a hard trigger: the detector reports
// a link violation without evaluating any window.
//
// Matches:
//   scheme URLs          http://x.y, https://www.x.y/path
//   www-prefixed hosts   www.example.com
//   dotted hosts         play.example.net (two or more dots)
//   common bare domains  example.com, shop.gg

use std::sync::OnceLock;

use regex::Regex;

static LINK_RE: OnceLock<Regex> = OnceLock::new();

const LINK_PATTERN: &str = concat!(
    r"(?i)",
    r"(?:https?://[a-z0-9@:%._+~#=-]{1,256}\.[a-z0-9()]{1,6}\b[-a-z0-9()@:%_+.~#?&/=]*)",
    r"|(?:www\.[-a-z0-9@:%._+~#=]{1,256}\.[a-z0-9()]{1,6}\b[-a-z0-9()@:%_+.~#?&/=]*)",
    r"|(?:[a-z0-9-]+\.[a-z0-9.-]+\.[a-z]{2,}\b)",
    r"|(?:\b[a-z0-9-]{2,}\.(?:com|net|org|ru|su|io|gg|me|xyz|info)\b)",
);

fn link_re() -> &'static Regex {
    LINK_RE.get_or_init(|| Regex::new(LINK_PATTERN).expect("link pattern is a valid regex"))
}

pub fn contains_link(message: &str) -> bool {
    link_re().is_match(message)
}
