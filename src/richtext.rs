//! Renders CMS rich-text blocks as HTML. A rich-text field is a flat list of
//! blocks (paragraphs, headings, list items, images, embeds); each text block
//! carries its plain text plus a list of spans which mark up ranges of that
//! text (bold, italic, links, labels). Span offsets count UTF-16 code units,
//! so they're translated to byte offsets before slicing the text.

use std::io;

use pulldown_cmark::escape::{escape_href, escape_html, StrWrite};
use serde::{Deserialize, Serialize};

/// A single rich-text block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub spans: Vec<Span>,

    /// Set on `image` blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Set on `image` blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,

    /// Set on `embed` blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oembed: Option<Embed>,
}

impl Block {
    /// Convenience constructor for a plain paragraph.
    pub fn paragraph(text: &str) -> Block {
        Block {
            kind: String::from("paragraph"),
            text: text.to_owned(),
            spans: Vec::new(),
            url: None,
            alt: None,
            oembed: None,
        }
    }
}

/// Markup applied to the range `start..end` of a block's text.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Span {
    pub start: usize,
    pub end: usize,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SpanData>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SpanData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// Escapes `s` for use as HTML text.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    // Writing into a `String` can't fail.
    let _ = escape_html(&mut out, s);
    out
}

/// Renders `blocks` as HTML, appending to `w`. Consecutive `list-item` and
/// `o-list-item` blocks are grouped into `<ul>` and `<ol>` elements.
pub fn push_html<W: StrWrite>(w: &mut W, blocks: &[Block]) -> io::Result<()> {
    let mut open_list: Option<&'static str> = None;
    for block in blocks {
        let list = match block.kind.as_str() {
            "list-item" => Some("ul"),
            "o-list-item" => Some("ol"),
            _ => None,
        };
        if open_list != list {
            if let Some(tag) = open_list {
                w.write_fmt(format_args!("</{}>\n", tag))?;
            }
            if let Some(tag) = list {
                w.write_fmt(format_args!("<{}>", tag))?;
            }
            open_list = list;
        }
        push_block(w, block)?;
    }
    if let Some(tag) = open_list {
        w.write_fmt(format_args!("</{}>\n", tag))?;
    }
    Ok(())
}

/// Renders `blocks` into a new string.
pub fn to_html(blocks: &[Block]) -> String {
    let mut out = String::new();
    let _ = push_html(&mut out, blocks);
    out
}

fn push_block<W: StrWrite>(w: &mut W, block: &Block) -> io::Result<()> {
    let tag = match block.kind.as_str() {
        "paragraph" => "p",
        "heading1" => "h1",
        "heading2" => "h2",
        "heading3" => "h3",
        "heading4" => "h4",
        "heading5" => "h5",
        "heading6" => "h6",
        "preformatted" => "pre",
        "list-item" | "o-list-item" => "li",
        "image" => return push_image(w, block),
        "embed" => return push_embed(w, block),
        _ => "p",
    };
    w.write_fmt(format_args!("<{}>", tag))?;
    push_spans(w, &block.text, &block.spans)?;
    w.write_fmt(format_args!("</{}>\n", tag))
}

fn push_image<W: StrWrite>(w: &mut W, block: &Block) -> io::Result<()> {
    let url = match &block.url {
        Some(url) => url,
        None => return Ok(()),
    };
    w.write_str("<p class=\"block-img\"><img src=\"")?;
    escape_href(&mut *w, url)?;
    w.write_str("\" alt=\"")?;
    escape_html(&mut *w, block.alt.as_deref().unwrap_or(""))?;
    w.write_str("\" /></p>\n")
}

fn push_embed<W: StrWrite>(w: &mut W, block: &Block) -> io::Result<()> {
    if let Some(html) = block.oembed.as_ref().and_then(|e| e.html.as_deref()) {
        w.write_str("<div class=\"embed\">")?;
        w.write_str(html)?;
        w.write_str("</div>\n")?;
    }
    Ok(())
}

/// Writes `text` with `spans` applied. Spans are opened in order of their
/// start offset (longest first on ties); when a span ends while spans opened
/// after it are still active, those are closed and reopened so the output
/// stays well nested.
fn push_spans<W: StrWrite>(w: &mut W, text: &str, spans: &[Span]) -> io::Result<()> {
    let offsets = utf16_offsets(text);
    let units = offsets.len() - 1;

    let mut sorted: Vec<&Span> = spans
        .iter()
        .filter(|s| s.start < s.end && s.end <= units)
        .collect();
    sorted.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut boundaries: Vec<usize> = sorted.iter().flat_map(|s| vec![s.start, s.end]).collect();
    boundaries.push(0);
    boundaries.push(units);
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut stack: Vec<&Span> = Vec::new();
    let mut next = 0;
    for window in boundaries.windows(2) {
        let (from, to) = (window[0], window[1]);

        // close spans ending here, reopening any still-active ones above them
        if let Some(lowest) = stack.iter().position(|s| s.end <= from) {
            let popped: Vec<&Span> = stack.drain(lowest..).collect();
            for span in popped.iter().rev() {
                close_span(w, span)?;
            }
            for span in popped.into_iter().filter(|s| s.end > from) {
                open_span(w, span)?;
                stack.push(span);
            }
        }

        while next < sorted.len() && sorted[next].start == from {
            open_span(w, sorted[next])?;
            stack.push(sorted[next]);
            next += 1;
        }

        push_text(w, &text[offsets[from]..offsets[to]])?;
    }
    for span in stack.iter().rev() {
        close_span(w, span)?;
    }
    Ok(())
}

fn push_text<W: StrWrite>(w: &mut W, text: &str) -> io::Result<()> {
    let mut lines = text.split('\n');
    if let Some(first) = lines.next() {
        escape_html(&mut *w, first)?;
    }
    for line in lines {
        w.write_str("<br />")?;
        escape_html(&mut *w, line)?;
    }
    Ok(())
}

fn open_span<W: StrWrite>(w: &mut W, span: &Span) -> io::Result<()> {
    match span.kind.as_str() {
        "strong" => w.write_str("<strong>"),
        "em" => w.write_str("<em>"),
        "hyperlink" => {
            let data = span.data.clone().unwrap_or_default();
            w.write_str("<a href=\"")?;
            escape_href(&mut *w, data.url.as_deref().unwrap_or("#"))?;
            if let Some(target) = &data.target {
                w.write_str("\" target=\"")?;
                escape_html(&mut *w, target)?;
                w.write_str("\" rel=\"noopener noreferrer")?;
            }
            w.write_str("\">")
        }
        _ => {
            let label = span
                .data
                .as_ref()
                .and_then(|d| d.label.as_deref())
                .unwrap_or(&span.kind);
            w.write_str("<span class=\"")?;
            escape_html(&mut *w, label)?;
            w.write_str("\">")
        }
    }
}

fn close_span<W: StrWrite>(w: &mut W, span: &Span) -> io::Result<()> {
    match span.kind.as_str() {
        "strong" => w.write_str("</strong>"),
        "em" => w.write_str("</em>"),
        "hyperlink" => w.write_str("</a>"),
        _ => w.write_str("</span>"),
    }
}

/// Maps each UTF-16 code unit offset of `text` to a byte offset. The result
/// has one entry per code unit plus a final entry for `text.len()`. Offsets
/// falling inside a surrogate pair map to the start of the character.
fn utf16_offsets(text: &str) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(text.len() + 1);
    for (i, c) in text.char_indices() {
        for _ in 0..c.len_utf16() {
            offsets.push(i);
        }
    }
    offsets.push(text.len());
    offsets
}

#[cfg(test)]
mod test {
    use super::*;

    fn span(start: usize, end: usize, kind: &str) -> Span {
        Span {
            start,
            end,
            kind: kind.to_owned(),
            data: None,
        }
    }

    fn block(kind: &str, text: &str, spans: Vec<Span>) -> Block {
        Block {
            kind: kind.to_owned(),
            spans,
            ..Block::paragraph(text)
        }
    }

    #[test]
    fn test_paragraph_text_is_escaped() {
        assert_eq!(
            "<p>1 &lt; 2 &amp;&amp; x</p>\n",
            to_html(&[Block::paragraph("1 < 2 && x")])
        );
    }

    #[test]
    fn test_headings_and_preformatted() {
        assert_eq!(
            "<h2>Title</h2>\n<pre>code</pre>\n",
            to_html(&[
                block("heading2", "Title", Vec::new()),
                block("preformatted", "code", Vec::new()),
            ])
        );
    }

    #[test]
    fn test_list_items_are_grouped() {
        assert_eq!(
            "<ul><li>a</li>\n<li>b</li>\n</ul>\n<ol><li>c</li>\n</ol>\n<p>d</p>\n",
            to_html(&[
                block("list-item", "a", Vec::new()),
                block("list-item", "b", Vec::new()),
                block("o-list-item", "c", Vec::new()),
                Block::paragraph("d"),
            ])
        );
    }

    #[test]
    fn test_nested_spans() {
        assert_eq!(
            "<p><strong>bold <em>both</em></strong> plain</p>\n",
            to_html(&[block(
                "paragraph",
                "bold both plain",
                vec![span(0, 9, "strong"), span(5, 9, "em")],
            )])
        );
    }

    #[test]
    fn test_overlapping_spans_stay_well_nested() {
        assert_eq!(
            "<p><strong>ab<em>cd</em></strong><em>ef</em></p>\n",
            to_html(&[block(
                "paragraph",
                "abcdef",
                vec![span(0, 4, "strong"), span(2, 6, "em")],
            )])
        );
    }

    #[test]
    fn test_hyperlink() {
        let mut link = span(4, 8, "hyperlink");
        link.data = Some(SpanData {
            url: Some("https://example.org/?a=1&b=2".to_owned()),
            target: Some("_blank".to_owned()),
            label: None,
        });
        assert_eq!(
            "<p>see <a href=\"https://example.org/?a=1&amp;b=2\" target=\"_blank\" \
             rel=\"noopener noreferrer\">this</a></p>\n",
            to_html(&[block("paragraph", "see this", vec![link])])
        );
    }

    #[test]
    fn test_span_offsets_are_utf16() {
        // "ã" is one UTF-16 unit but two bytes; "😀" is two units.
        assert_eq!(
            "<p>😀 <em>ação</em></p>\n",
            to_html(&[block("paragraph", "😀 ação", vec![span(3, 7, "em")])])
        );
    }

    #[test]
    fn test_out_of_range_spans_are_ignored() {
        assert_eq!(
            "<p>short</p>\n",
            to_html(&[block("paragraph", "short", vec![span(2, 40, "strong")])])
        );
    }

    #[test]
    fn test_image_block() {
        let mut image = block("image", "", Vec::new());
        image.url = Some("https://images.example.org/a.png".to_owned());
        image.alt = Some("a \"cat\"".to_owned());
        assert_eq!(
            "<p class=\"block-img\"><img src=\"https://images.example.org/a.png\" \
             alt=\"a &quot;cat&quot;\" /></p>\n",
            to_html(&[image])
        );
    }

    #[test]
    fn test_line_breaks() {
        assert_eq!("<p>a<br />b</p>\n", to_html(&[Block::paragraph("a\nb")]));
    }
}
