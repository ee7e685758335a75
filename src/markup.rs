use lazy_static::lazy_static;
use regex::Regex;

use crate::RenderFailure;

lazy_static! {
    static ref DOCTYPE_RE: Regex = Regex::new(r"<!DOCTYPE [^>]+>").unwrap();
    static ref XML_TAG_RE: Regex = Regex::new(r"<\?xml [^>]+\?>").unwrap();
    static ref NEW_LINE_TAGS_RE: Regex = Regex::new(r">\s+<").unwrap();
    static ref NEWLINES_RE: Regex = Regex::new(r"\n\n+").unwrap();
}

/// The content a block gets when its diagram failed to render: whatever the library
/// drew for the failure, then the message with its line breaks kept.
pub(crate) fn error_fragment(failure: &RenderFailure) -> String {
    let message = htmlize::escape_text(failure.message()).replace('\n', "<br>");
    let details = format!(r#"<div style="text-align: left"><small>{message}</small></div>"#);

    match failure.placeholder() {
        Some(placeholder) => format!("{placeholder}<br>\n{details}"),
        None => details,
    }
}

/// Strip the standalone document parts from an SVG and collapse the whitespace between
/// its tags so it can live inside HTML.
pub(crate) fn format_for_inline(svg: &str) -> String {
    let svg = DOCTYPE_RE.replace(svg, "");
    let svg = XML_TAG_RE.replace(&svg, "");
    // whitespace between tags would end up as text nodes inside the block
    let svg = NEW_LINE_TAGS_RE.replace_all(&svg, "><");
    let svg = NEWLINES_RE.replace_all(&svg, "\n");

    svg.trim().to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fragment_with_placeholder() {
        let failure = RenderFailure::new("Parse error on line 2:\n...A-->\n---^")
            .with_placeholder(r#"<svg id="mermaid1"></svg>"#);

        assert_eq!(
            error_fragment(&failure),
            r#"<svg id="mermaid1"></svg><br>
<div style="text-align: left"><small>Parse error on line 2:<br>...A--&gt;<br>---^</small></div>"#
        );
    }

    #[test]
    fn fragment_without_placeholder() {
        assert_eq!(
            error_fragment(&RenderFailure::new("mmdc exited with 1")),
            r#"<div style="text-align: left"><small>mmdc exited with 1</small></div>"#
        );
    }

    #[test]
    fn inline_svg_drops_prolog_and_collapses_whitespace() {
        let svg = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE svg PUBLIC "-//W3C//DTD SVG 1.1//EN" "http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd">
<svg id="mermaid0">
  <g>
    <text>A


B</text>
  </g>
</svg>
"#;

        assert_eq!(
            format_for_inline(svg),
            "<svg id=\"mermaid0\"><g><text>A\nB</text></g></svg>"
        );
    }
}
