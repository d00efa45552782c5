//! Parser for POV ("point of view") sharing blocks embedded in entry text.
//!
//! Two syntaxes are recognised:
//!
//! ```text
//! {pov} @alice bob          {pov} @alice
//! Shared text...            Shared text until a blank line,
//! {/pov}                    the next {pov}, or end of input.
//! ```
//!
//! Closed blocks take precedence. They are matched first and their ranges are
//! masked out before open-ended blocks are looked for in the remainder, so the
//! same opener is never reported twice. Only an opener at the start of a line
//! ends another block; one in the middle of a line is plain text.

use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref OPENER: Regex = Regex::new(r"(?i)\{pov\}").expect("opener pattern");
    static ref CLOSER: Regex = Regex::new(r"(?i)\{/pov\}").expect("closer pattern");
    static ref RECIPIENT_LINE: Regex = Regex::new(r"^[\w@,\s]+$").expect("recipient line pattern");
    static ref RECIPIENT: Regex = Regex::new(r"@?(\w+)").expect("recipient pattern");
    static ref INJECTED_FENCE: Regex =
        Regex::new(r"(?s)(?:<!-- pov:[0-9a-f]+ -->\s*)?```pov\s+@\w+[^\n]*\n.*?```").expect("fence pattern");
    static ref AUTHOR_BLOCK: Regex =
        Regex::new(r"(?is)\{pov\}[^\n]*\n.*?\{/pov\}").expect("author block pattern");
    static ref EXCESS_BLANK_LINES: Regex = Regex::new(r"\n{3,}").expect("blank line pattern");
}

/// One sharing directive found in an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PovBlock {
    /// Recipient names as written, without the `@` prefix.
    pub recipients: Vec<String>,
    /// Trimmed body text.
    pub body: String,
    /// Byte range of the whole directive in the source text.
    pub range: Range<usize>,
}

/// Which syntax produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Closed,
    Open,
}

/// Parse every POV block in `content`, ordered by position.
pub fn parse(content: &str) -> Vec<PovBlock> {
    let openers: Vec<Range<usize>> = OPENER.find_iter(content).map(|m| m.range()).collect();
    if openers.is_empty() {
        return Vec::new();
    }

    let mut masked: Vec<Range<usize>> = Vec::new();
    let mut blocks = Vec::new();

    // Pass 1: closed blocks.
    for opener in &openers {
        if masked.iter().any(|r| r.contains(&opener.start)) {
            continue;
        }
        if let Some(block) = parse_at(content, opener, &openers, &masked, Syntax::Closed) {
            masked.push(block.range.clone());
            blocks.push(block);
        }
    }

    // Pass 2: open-ended blocks in the unmasked remainder.
    for opener in &openers {
        if masked.iter().any(|r| r.contains(&opener.start)) {
            continue;
        }
        if let Some(block) = parse_at(content, opener, &openers, &masked, Syntax::Open) {
            masked.push(block.range.clone());
            blocks.push(block);
        }
    }

    blocks.sort_by_key(|b| b.range.start);
    blocks
}

/// Try to read one block starting at `opener`.
///
/// `None` when the text at `opener` is not a block of the requested syntax
/// or its body is empty.
fn parse_at(
    content: &str,
    opener: &Range<usize>,
    openers: &[Range<usize>],
    masked: &[Range<usize>],
    syntax: Syntax,
) -> Option<PovBlock> {
    let line_end = opener.end + content[opener.end..].find('\n')?;
    let recipients = parse_recipient_line(&content[opener.end..line_end])?;
    let body_start = line_end + 1;

    match syntax {
        Syntax::Closed => {
            let closer = CLOSER.find_at(content, body_start)?;
            let next_opener = openers
                .iter()
                .find(|o| o.start >= body_start && starts_line(content, o.start));
            if next_opener.is_some_and(|o| o.start < closer.start()) {
                return None;
            }
            let body = content[body_start..closer.start()].trim();
            make_block(recipients, body, opener.start..closer.end())
        }
        Syntax::Open => {
            let limit = masked
                .iter()
                .map(|r| r.start)
                .filter(|&s| s >= body_start)
                .min()
                .unwrap_or(content.len());
            let body_end = scan_open_body(content, body_start, limit);
            let body = content[body_start..body_end].trim();
            make_block(recipients, body, opener.start..body_end.max(line_end))
        }
    }
}

/// Find where an open-ended body stops: before a blank line, before a line
/// that starts with an opener or closer, or at `limit`.
fn scan_open_body(content: &str, start: usize, limit: usize) -> usize {
    let mut end = start;
    let mut cursor = start;

    while cursor < limit {
        let line_end = content[cursor..limit]
            .find('\n')
            .map(|i| cursor + i)
            .unwrap_or(limit);
        let line = &content[cursor..line_end];

        let directive = OPENER.find(line).is_some_and(|m| m.start() == 0)
            || CLOSER.find(line).is_some_and(|m| m.start() == 0);
        if line.trim().is_empty() || directive {
            break;
        }

        end = line_end;
        cursor = line_end + 1;
    }

    end
}

fn starts_line(content: &str, pos: usize) -> bool {
    pos == 0 || content.as_bytes()[pos - 1] == b'\n'
}

fn parse_recipient_line(line: &str) -> Option<Vec<String>> {
    let line = line.trim();
    if line.is_empty() || !RECIPIENT_LINE.is_match(line) {
        return None;
    }

    let mut names: Vec<String> = Vec::new();
    for cap in RECIPIENT.captures_iter(line) {
        let name = &cap[1];
        if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            names.push(name.to_string());
        }
    }

    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

fn make_block(recipients: Vec<String>, body: &str, range: Range<usize>) -> Option<PovBlock> {
    if body.is_empty() {
        return None;
    }
    Some(PovBlock {
        recipients,
        body: body.to_string(),
        range,
    })
}

/// Like [`parse`], but text inside injected copies of other users' blocks
/// is ignored. Byte ranges still refer to `content`.
pub fn parse_authored(content: &str) -> Vec<PovBlock> {
    if !INJECTED_FENCE.is_match(content) {
        return parse(content);
    }
    let masked = INJECTED_FENCE.replace_all(content, |caps: &regex::Captures<'_>| {
        " ".repeat(caps[0].len())
    });
    parse(&masked)
}

/// Entry text with author POV blocks and injected copies removed, for
/// previews and word counts.
pub fn strip_blocks(content: &str) -> String {
    let without_injected = INJECTED_FENCE.replace_all(content, "");
    let without_authored = AUTHOR_BLOCK.replace_all(&without_injected, "");
    EXCESS_BLANK_LINES
        .replace_all(&without_authored, "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_closed_block() {
        let content = "{pov} alice\nHad a great day!\n{/pov}";
        let blocks = parse(content);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].recipients, vec!["alice"]);
        assert_eq!(blocks[0].body, "Had a great day!");
        assert_eq!(blocks[0].range, 0..content.len());
    }

    #[test]
    fn test_multiple_recipients_with_and_without_at() {
        let blocks = parse("{POV} @alice, bob @Carol_2\nhello\n{/POV}");
        assert_eq!(blocks[0].recipients, vec!["alice", "bob", "Carol_2"]);
    }

    #[test]
    fn test_duplicate_recipients_collapse() {
        let blocks = parse("{pov} alice @Alice\nhello\n{/pov}");
        assert_eq!(blocks[0].recipients, vec!["alice"]);
    }

    #[test]
    fn test_open_block_ends_at_blank_line() {
        let content = "Morning.\n{pov} @alice\nline one\nline two\n\nPrivate again.";
        let blocks = parse(content);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].body, "line one\nline two");
        assert_eq!(&content[blocks[0].range.clone()], "{pov} @alice\nline one\nline two");
    }

    #[test]
    fn test_open_block_ends_at_next_opener() {
        let content = "{pov} alice\nfor alice\n{pov} bob\nfor bob";
        let blocks = parse(content);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].body, "for alice");
        assert_eq!(blocks[1].recipients, vec!["bob"]);
        assert_eq!(blocks[1].body, "for bob");
    }

    #[test]
    fn test_closed_wins_over_open_for_same_opener() {
        let content = "{pov} alice\nfirst line\nsecond line\n{/pov}";
        let blocks = parse(content);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].body, "first line\nsecond line");
        assert_eq!(blocks[0].range.end, content.len());
    }

    #[test]
    fn test_open_block_stops_before_closed_block() {
        let content = "{pov} bob\nopen text\n{pov} alice\nclosed text\n{/pov}\n\nafter";
        let blocks = parse(content);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].recipients, vec!["bob"]);
        assert_eq!(blocks[0].body, "open text");
        assert_eq!(blocks[1].recipients, vec!["alice"]);
        assert_eq!(blocks[1].body, "closed text");
        assert!(blocks[0].range.end <= blocks[1].range.start);
    }

    #[test]
    fn test_mid_line_opener_is_part_of_closed_body() {
        let content = "{pov} alice\nI typed {pov} by accident\n{/pov}";
        let blocks = parse(content);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].recipients, vec!["alice"]);
        assert_eq!(blocks[0].body, "I typed {pov} by accident");
        assert_eq!(blocks[0].range, 0..content.len());
    }

    #[test]
    fn test_empty_closed_block_does_not_hide_its_text() {
        let content = "{pov} alice\n{/pov}\n{pov} bob\nfor bob\n{/pov}";
        let blocks = parse(content);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].recipients, vec!["bob"]);
        assert_eq!(blocks[0].body, "for bob");
    }

    #[test]
    fn test_mixed_blocks_sorted_by_position() {
        let content = "{pov} a\nopen\n\n{pov} b\nclosed\n{/pov}\n{pov} c\nlast";
        let names: Vec<_> = parse(content)
            .into_iter()
            .map(|b| b.recipients[0].clone())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_block_without_recipients_is_ignored() {
        assert!(parse("{pov}\nnobody to share with\n{/pov}").is_empty());
        assert!(parse("{pov} hello!?\nnot a recipient line\n{/pov}").is_empty());
    }

    #[test]
    fn test_empty_body_is_ignored() {
        assert!(parse("{pov} alice\n\n{/pov}").is_empty());
        assert!(parse("{pov} alice\n").is_empty());
    }

    #[test]
    fn test_opener_without_newline_is_ignored() {
        assert!(parse("{pov} alice").is_empty());
    }

    #[test]
    fn test_injected_copies_are_not_reshared() {
        let content = "<!-- pov:abc123 -->\n```pov @bob\n{pov} carol\nquoted\n```\n\n{pov} dave\nmine\n{/pov}";
        let blocks = parse_authored(content);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].recipients, vec!["dave"]);
        assert_eq!(&content[blocks[0].range.clone()], "{pov} dave\nmine\n{/pov}");
    }

    #[test]
    fn test_strip_blocks() {
        let content = "Before\n\n{pov} alice\nsecret\n{/pov}\n\n\n\n<!-- pov:abc123 -->\n```pov @bob\nfrom bob\n```\n\nAfter";
        assert_eq!(strip_blocks(content), "Before\n\nAfter");
    }

    proptest! {
        #[test]
        fn prop_parse_is_deterministic(content in "[a-z{}/\\n @]{0,80}") {
            prop_assert_eq!(parse(&content), parse(&content));
        }

        #[test]
        fn prop_blocks_never_overlap(content in "(\\{pov\\} [a-c]\\n[a-z ]{0,8}\\n(\\{/pov\\}\\n)?\\n?){0,6}") {
            let blocks = parse(&content);
            for pair in blocks.windows(2) {
                prop_assert!(pair[0].range.end <= pair[1].range.start);
            }
        }
    }
}
