//! Positioned text blocks, parsed from `pdftotext -bbox-layout` output.
//!
//! Poppler writes one tag per line, like this:
//!
//! ```text
//! <page width="612.000000" height="792.000000">
//!   <flow>
//!     <block xMin="72.0" yMin="35.2" xMax="170.0" yMax="53.6">
//!       <line xMin="72.0" yMin="35.2" xMax="170.0" yMax="53.6">
//!         <word xMin="72.0" yMin="35.2" xMax="130.0" yMax="53.6">Invoice</word>
//! ```
//!
//! We only keep pages, blocks and the words of each line.

use std::sync::LazyLock;

use regex::Regex;

use crate::{prelude::*, store::Rect};

static PAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<page width="([-\d.]+)" height="([-\d.]+)">"#)
        .expect("failed to compile regex")
});

static BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<block xMin="([-\d.]+)" yMin="([-\d.]+)" xMax="([-\d.]+)" yMax="([-\d.]+)">"#)
        .expect("failed to compile regex")
});

static WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<word [^>]*>(.*?)</word>").expect("failed to compile regex"));

/// The text layout of one page.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PageLayout {
    /// One-based page number.
    pub page: usize,
    pub width: f64,
    pub height: f64,
    pub blocks: Vec<TextBlock>,
}

/// A block of text and its bounding box, in PDF points from the top left.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextBlock {
    pub bbox: Rect,
    pub lines: Vec<String>,
}

/// Parse `pdftotext -bbox-layout` output.
pub fn parse_bbox_layout(xhtml: &str) -> Result<Vec<PageLayout>> {
    let mut pages = vec![];
    let mut block: Option<TextBlock> = None;
    let mut words: Vec<String> = vec![];

    for line in xhtml.lines().map(str::trim) {
        if let Some(caps) = PAGE_REGEX.captures(line) {
            pages.push(PageLayout {
                page: pages.len() + 1,
                width: parse_coord(&caps[1])?,
                height: parse_coord(&caps[2])?,
                blocks: vec![],
            });
        } else if let Some(caps) = BLOCK_REGEX.captures(line) {
            block = Some(TextBlock {
                bbox: Rect::from([
                    parse_coord(&caps[1])?,
                    parse_coord(&caps[2])?,
                    parse_coord(&caps[3])?,
                    parse_coord(&caps[4])?,
                ]),
                lines: vec![],
            });
        } else if let Some(caps) = WORD_REGEX.captures(line) {
            words.push(unescape(&caps[1]));
        } else if line == "</line>" {
            if let Some(block) = block.as_mut() {
                block.lines.push(words.join(" "));
            }
            words.clear();
        } else if line == "</block>" {
            let finished = block
                .take()
                .ok_or_else(|| anyhow!("pdftotext layout has </block> without <block>"))?;
            pages
                .last_mut()
                .ok_or_else(|| anyhow!("pdftotext layout has a block outside any page"))?
                .blocks
                .push(finished);
        }
    }
    Ok(pages)
}

fn parse_coord(s: &str) -> Result<f64> {
    s.parse()
        .with_context(|| format!("bad coordinate {:?} in pdftotext layout", s))
}

/// Undo the XML escaping `pdftotext` applies to words.
fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
<title></title>
</head>
<body>
<doc>
  <page width="612.000000" height="792.000000">
    <flow>
      <block xMin="72.000000" yMin="35.208000" xMax="170.010000" yMax="53.640000">
        <line xMin="72.000000" yMin="35.208000" xMax="170.010000" yMax="53.640000">
          <word xMin="72.000000" yMin="35.208000" xMax="132.030000" yMax="53.640000">Invoice</word>
          <word xMin="137.034000" yMin="35.208000" xMax="170.010000" yMax="53.640000">#42</word>
        </line>
        <line xMin="72.000000" yMin="60.000000" xMax="150.000000" yMax="70.000000">
          <word xMin="72.000000" yMin="60.000000" xMax="150.000000" yMax="70.000000">Smith&amp;Co</word>
        </line>
      </block>
    </flow>
  </page>
  <page width="300.000000" height="400.000000">
  </page>
</doc>
</body>
</html>
"#;

    #[test]
    fn parses_pages_blocks_and_lines() {
        let pages = parse_bbox_layout(SAMPLE).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[0].width, 612.0);
        assert_eq!(pages[0].blocks.len(), 1);
        let block = &pages[0].blocks[0];
        assert_eq!(block.bbox, Rect::from([72.0, 35.208, 170.01, 53.64]));
        assert_eq!(block.lines, vec!["Invoice #42", "Smith&Co"]);
        assert_eq!(pages[1].page, 2);
        assert!(pages[1].blocks.is_empty());
    }

    #[test]
    fn rejects_stray_blocks() {
        assert!(parse_bbox_layout("</block>").is_err());
    }
}
