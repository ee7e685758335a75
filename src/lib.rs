//! Lazily render mermaid diagram blocks inside an already rendered HTML document.
//!
//! A pass looks for `.language-mermaid` elements, loads the diagram library only when
//! there is something to draw, configures it and swaps every block's content for the
//! rendered SVG (or an inline error message). Rendered blocks are marked with
//! `data-processed="true"` so running the pass again over its own output is a no-op.
//!
//! ```ignore
//! use mermaid_html_render::{CommandLibrary, CommandScriptSource, Document, MermaidRenderer};
//!
//! let renderer = MermaidRenderer::new(CommandScriptSource::default(), CommandLibrary::default());
//! let mut document = Document::new(html);
//! let report = renderer
//!     .render(&mut document, None, mermaid_html_render::DEFAULT_CDN, "dark")
//!     .await?;
//! ```

pub use adapter::*;
pub use command::*;
pub use config::*;
pub use id::*;
pub use library::*;
pub use loader::*;
pub use renderer::*;

mod adapter;
mod command;
mod config;
mod id;
mod library;
mod loader;
mod markup;
mod renderer;

/// Where the editor assets, mermaid included, are published.
pub const DEFAULT_CDN: &str = "https://unpkg.com/vditor@3.11.1";

/// The only mermaid release this crate asks for.
pub const MERMAID_VERSION: &str = "11.6.0";

/// Key under which the mermaid script is loaded, at most once per renderer.
pub const SCRIPT_ONCE_KEY: &str = "vditorMermaidScript";

/// Location of the versioned mermaid bundle below a CDN base.
pub fn script_url(cdn: &str) -> String {
    format!(
        "{}/dist/js/mermaid/mermaid.min.js?v={MERMAID_VERSION}",
        cdn.trim_end_matches('/')
    )
}

/// Crate level failures. Per diagram failures never show up here, they are written
/// into the document instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("Invalid root selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("Error rewriting HTML: {0}")]
    Rewrite(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn script_url_is_versioned() {
        assert_eq!(
            script_url(DEFAULT_CDN),
            "https://unpkg.com/vditor@3.11.1/dist/js/mermaid/mermaid.min.js?v=11.6.0"
        );
    }

    #[test]
    fn script_url_trims_trailing_slash() {
        assert_eq!(
            script_url("http://localhost:8080/"),
            "http://localhost:8080/dist/js/mermaid/mermaid.min.js?v=11.6.0"
        );
    }
}
