use std::cell::{Cell, RefCell};
use std::rc::Rc;

use lol_html::html_content::{ContentType, EndTag};
use lol_html::{doc_text, element, rewrite_str, RewriteStrSettings, Selector};

use crate::renderer::BlockOutcome;
use crate::{Error, Result};

/// Class the markdown renderer puts on mermaid code blocks.
pub const DIAGRAM_CLASS: &str = "language-mermaid";
/// Attribute marking a block that was already rendered.
pub const PROCESSED_ATTRIBUTE: &str = "data-processed";

/// A rendered HTML document, or a fragment of one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    html: String,
}

impl Document {
    pub fn new<S: Into<String>>(html: S) -> Self {
        Self { html: html.into() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn into_html(self) -> String {
        self.html
    }
}

impl From<String> for Document {
    fn from(html: String) -> Self {
        Self::new(html)
    }
}

/// Selector matching the diagram blocks below an optional root container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSelector(String);

impl CandidateSelector {
    pub fn new(root: Option<&str>) -> Result<Self> {
        let selector = match root.map(str::trim).filter(|root| !root.is_empty()) {
            Some(root) => format!("{root} .{DIAGRAM_CLASS}"),
            None => format!(".{DIAGRAM_CLASS}"),
        };

        selector
            .parse::<Selector>()
            .map_err(|e| Error::Selector {
                selector: root.unwrap_or_default().to_string(),
                message: e.to_string(),
            })?;

        Ok(Self(selector))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One diagram placeholder element, as found in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramBlock {
    index: usize,
    source: String,
    processed: bool,
}

impl DiagramBlock {
    /// Position among the candidates, in document order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The raw diagram text, with entities decoded and nested markup flattened.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }
}

/// Collect the diagram blocks of `document` in document order.
///
/// Nested blocks each get their full text, so an outer block's source includes the text
/// of the blocks inside it.
pub fn list_candidates(
    document: &Document,
    selector: &CandidateSelector,
) -> Result<Vec<DiagramBlock>> {
    let blocks = RefCell::new(Vec::<DiagramBlock>::new());
    // blocks whose end tag has not been seen yet
    let open = Rc::new(RefCell::new(Vec::<usize>::new()));

    rewrite_str(
        document.html(),
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector.as_str(), |el| {
                let processed = el.get_attribute(PROCESSED_ATTRIBUTE).as_deref() == Some("true");
                let index = {
                    let mut blocks = blocks.borrow_mut();
                    let index = blocks.len();
                    blocks.push(DiagramBlock {
                        index,
                        source: String::new(),
                        processed,
                    });
                    index
                };

                // void elements have no end tag and no text
                if let Some(handlers) = el.end_tag_handlers() {
                    open.borrow_mut().push(index);
                    let open = Rc::clone(&open);
                    let handler: lol_html::EndTagHandler<'static> =
                        Box::new(move |_end: &mut EndTag<'_>| {
                            open.borrow_mut().retain(|&block| block != index);
                            Ok(())
                        });
                    handlers.push(handler);
                }
                Ok(())
            })],
            document_content_handlers: vec![doc_text!(|chunk| {
                let mut blocks = blocks.borrow_mut();
                for &index in open.borrow().iter() {
                    blocks[index].source.push_str(chunk.as_str());
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
    .map_err(|e| Error::Rewrite(e.to_string()))?;

    let mut blocks = blocks.into_inner();
    // text chunks come through raw, decode once the whole block is known
    for block in blocks.iter_mut() {
        block.source = htmlize::unescape(block.source.as_str()).into_owned();
    }

    Ok(blocks)
}

/// Write the outcome of a pass back into `document`.
///
/// `outcomes` is indexed like the blocks returned by [`list_candidates`] for the same
/// selector. Blocks whose outcome carries markup get it as their new content and are
/// marked processed, everything else is left as is.
pub(crate) fn apply_outcomes(
    document: &mut Document,
    selector: &CandidateSelector,
    outcomes: &[BlockOutcome],
) -> Result<()> {
    let index = Cell::new(0);

    let html = rewrite_str(
        document.html(),
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector.as_str(), |el| {
                let current = index.get();
                index.set(current + 1);

                if let Some(markup) = outcomes.get(current).and_then(BlockOutcome::markup) {
                    el.set_inner_content(markup, ContentType::Html);
                    el.set_attribute(PROCESSED_ATTRIBUTE, "true")?;
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
    .map_err(|e| Error::Rewrite(e.to_string()))?;

    document.html = html;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn candidates(html: &str, root: Option<&str>) -> Vec<DiagramBlock> {
        list_candidates(&Document::new(html), &CandidateSelector::new(root).unwrap()).unwrap()
    }

    #[test]
    fn lists_blocks_in_document_order() {
        let blocks = candidates(
            r#"<p>intro</p>
<div class="language-mermaid">graph A</div>
<pre class="language-rust">fn main() {}</pre>
<div class="note language-mermaid" data-processed="true"><svg></svg></div>
<div class="language-mermaid">graph C</div>"#,
            None,
        );

        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks.iter().map(DiagramBlock::index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(blocks[0].source(), "graph A");
        assert!(!blocks[0].is_processed());
        assert!(blocks[1].is_processed());
        assert_eq!(blocks[2].source(), "graph C");
    }

    #[test]
    fn decodes_entities_and_flattens_nested_markup() {
        let blocks = candidates(
            r#"<pre class="language-mermaid"><code>graph TD
    A --&gt; B
    B --&gt; C&amp;D</code></pre>"#,
            None,
        );

        assert_eq!(blocks[0].source(), "graph TD\n    A --> B\n    B --> C&D");
    }

    #[test]
    fn nested_blocks_share_their_text() {
        let blocks = candidates(
            r#"<pre class="language-mermaid">%% outer
<code class="language-mermaid">graph A</code></pre><p>after</p>"#,
            None,
        );

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].source(), "%% outer\ngraph A");
        assert_eq!(blocks[1].source(), "graph A");
    }

    #[test]
    fn only_true_counts_as_processed() {
        let blocks = candidates(
            r#"<div class="language-mermaid" data-processed="false">graph A</div>"#,
            None,
        );

        assert!(!blocks[0].is_processed());
    }

    #[test]
    fn root_limits_the_search() {
        let blocks = candidates(
            r#"<div class="language-mermaid">outside</div>
<section id="preview"><div class="language-mermaid">inside</div></section>"#,
            Some("#preview"),
        );

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].source(), "inside");
    }

    #[test]
    fn blank_root_means_whole_document() {
        assert_eq!(
            CandidateSelector::new(Some("  ")).unwrap().as_str(),
            ".language-mermaid"
        );
    }

    #[test]
    fn invalid_root_is_rejected() {
        let err = CandidateSelector::new(Some("div[")).unwrap_err();

        assert!(matches!(err, Error::Selector { ref selector, .. } if selector == "div["));
    }

    #[test]
    fn applies_markup_and_leaves_the_rest() {
        let mut document = Document::new(
            r#"<div class="language-mermaid">graph A</div><div class="language-mermaid">  </div>"#,
        );
        let selector = CandidateSelector::new(None).unwrap();

        apply_outcomes(
            &mut document,
            &selector,
            &[
                BlockOutcome::Rendered {
                    id: "mermaid0".into(),
                    markup: "<svg id=\"mermaid0\"></svg>".into(),
                },
                BlockOutcome::Skipped,
            ],
        )
        .unwrap();

        assert_eq!(
            document.html(),
            r#"<div class="language-mermaid" data-processed="true"><svg id="mermaid0"></svg></div><div class="language-mermaid">  </div>"#
        );
    }
}
