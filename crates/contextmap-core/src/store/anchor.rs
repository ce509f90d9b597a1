/// What the pre-flight phase shows the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// No current summary exists yet.
    Fresh,
    /// Recap text extracted from the current summary.
    Recap(String),
}

/// Element ids that mark the anchor section structurally.
const ANCHOR_IDS: &[&str] = &[" id=\"anchor\"", " id='anchor'", " id=anchor"];

/// Headings or lead-ins that mark the anchor section in text.
const TEXT_MARKERS: &[&str] = &["context anchor", "where we left off"];

/// Tags that start a new line of text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "br", "dd", "details", "div", "dl",
    "dt", "figcaption", "figure", "footer", "head", "header", "hr", "html", "li", "main", "nav",
    "ol", "p", "pre", "summary", "table", "td", "th", "title", "tr", "ul",
];

/// One line of displayable text. Headings end a section.
#[derive(Debug)]
struct TextLine {
    text: String,
    heading: bool,
    link: bool,
}

/// Pull the Context Anchor out of a summary document.
///
/// An element with `id="anchor"` wins. Otherwise the first heading or
/// lead-in line naming the anchor starts the section, which runs until the
/// next heading; links to the section do not count. Text after the marker
/// on the same line is kept. Without either, the first `max_lines` lines of
/// the document are used. HTML is rendered to plain lines first, dropping
/// styles, scripts and in-page navigation links.
pub fn extract_anchor(document: &str, max_lines: usize) -> String {
    if let Some(element) = anchor_element(document) {
        let section = collect(
            render_html(element)
                .into_iter()
                .filter_map(|line| without_marker(&line.text)),
            max_lines,
        );
        if !section.is_empty() {
            return section.join("\n");
        }
    }

    let lines = if looks_like_html(document) {
        render_html(document)
    } else {
        markdown_lines(document)
    };

    if let Some(idx) = lines
        .iter()
        .position(|line| !line.link && marker_end(&line.text).is_some())
    {
        let first = without_marker(&lines[idx].text);
        let rest = lines[idx + 1..]
            .iter()
            .take_while(|line| !line.heading)
            .filter_map(|line| without_marker(&line.text));
        let section = collect(first.into_iter().chain(rest), max_lines);
        if !section.is_empty() {
            return section.join("\n");
        }
    }

    collect(lines.into_iter().map(|line| line.text), max_lines).join("\n")
}

fn collect(lines: impl Iterator<Item = String>, max_lines: usize) -> Vec<String> {
    lines
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.trim().is_empty())
        .take(max_lines)
        .collect()
}

/// Byte offset just past a text marker that opens `text`, ignoring leading
/// heading and emphasis decoration.
fn marker_end(text: &str) -> Option<usize> {
    let body = text.trim_start_matches(|c: char| {
        c.is_whitespace() || matches!(c, '#' | '*' | '_' | '-' | '>' | '=')
    });
    let lower = body.to_ascii_lowercase();
    let skipped = text.len() - body.len();
    TEXT_MARKERS
        .iter()
        .find(|marker| lower.starts_with(*marker))
        .map(|marker| skipped + marker.len())
}

/// The line with any leading marker removed; `None` when nothing is left.
fn without_marker(text: &str) -> Option<String> {
    let Some(end) = marker_end(text) else {
        return Some(text.to_string());
    };
    let rest = text[end..]
        .trim_start_matches(|c: char| {
            c.is_whitespace() || matches!(c, ':' | '-' | '*' | '_' | '#' | '|' | ')' | '>')
        })
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '#' | '|'));
    (!rest.is_empty()).then(|| rest.to_string())
}

fn looks_like_html(document: &str) -> bool {
    let lower = document.trim_start().to_ascii_lowercase();
    lower.starts_with("<!doctype")
        || lower.starts_with("<html")
        || lower.contains("<body")
        || lower.contains("<section")
}

/// The element carrying an anchor id, from its opening tag up to its
/// closing tag (or the end of the document).
fn anchor_element(document: &str) -> Option<&str> {
    let lower = document.to_ascii_lowercase();
    let at = ANCHOR_IDS.iter().filter_map(|id| lower.find(id)).min()?;
    let start = lower[..at].rfind('<')?;
    let name: String = lower[start + 1..]
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect();
    if name.is_empty() {
        return None;
    }
    let end = lower[at..]
        .find(&format!("</{name}"))
        .map_or(document.len(), |i| at + i);
    Some(&document[start..end])
}

fn markdown_lines(document: &str) -> Vec<TextLine> {
    document
        .lines()
        .map(|line| TextLine {
            text: strip_inline_tags(line),
            heading: line.trim_start().starts_with('#'),
            link: line.contains("](#") || line.contains("href="),
        })
        .collect()
}

fn strip_inline_tags(line: &str) -> String {
    if !line.contains('<') {
        return line.trim_end().to_string();
    }
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(out.trim_end())
}

/// Render HTML to lines of text: block tags break lines, whitespace
/// collapses, `<style>`/`<script>`/comments and in-page links vanish.
fn render_html(html: &str) -> Vec<TextLine> {
    let lower = html.to_ascii_lowercase();
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut heading = false;
    let mut pos = 0;

    while pos < html.len() {
        let Some(offset) = html[pos..].find('<') else {
            push_text(&mut current, &html[pos..]);
            break;
        };
        push_text(&mut current, &html[pos..pos + offset]);
        let start = pos + offset;

        if lower[start..].starts_with("<!--") {
            pos = lower[start..].find("-->").map_or(html.len(), |i| start + i + 3);
            continue;
        }
        let Some(close) = html[start..].find('>') else {
            push_text(&mut current, &html[start..]);
            break;
        };
        let end = start + close + 1;
        let tag = &lower[start + 1..end - 1];
        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(char::is_ascii_alphanumeric)
            .collect();
        pos = end;

        match name.as_str() {
            "style" | "script" if !closing => {
                pos = lower[end..]
                    .find(&format!("</{name}"))
                    .map_or(html.len(), |i| end + i);
            }
            "a" if !closing && is_fragment_link(tag) => {
                pos = lower[end..].find("</a").map_or(html.len(), |i| end + i);
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                flush(&mut lines, &mut current, heading);
                heading = !closing;
            }
            "section" => {
                flush(&mut lines, &mut current, heading);
                lines.push(TextLine {
                    text: String::new(),
                    heading: true,
                    link: false,
                });
            }
            block if BLOCK_TAGS.contains(&block) => flush(&mut lines, &mut current, heading),
            _ => {}
        }
    }
    flush(&mut lines, &mut current, heading);
    lines
}

fn is_fragment_link(tag: &str) -> bool {
    tag.contains("href=\"#") || tag.contains("href='#") || tag.contains("href=#")
}

fn push_text(current: &mut String, text: &str) {
    for c in text.chars() {
        if c.is_whitespace() {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
        } else {
            current.push(c);
        }
    }
}

fn flush(lines: &mut Vec<TextLine>, current: &mut String, heading: bool) {
    let text = decode_entities(current.trim());
    current.clear();
    if !text.is_empty() {
        lines.push(TextLine {
            text,
            heading,
            link: false,
        });
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
