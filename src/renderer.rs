use std::time::Duration;

use futures::future;

use crate::adapter::{apply_outcomes, list_candidates, CandidateSelector, DiagramBlock, Document};
use crate::markup::error_fragment;
use crate::{
    script_url, CommandLibrary, CommandScriptSource, DiagramLibrary, IdGenerator, LibraryHandle,
    RenderConfig, RenderSettings, Result, ScriptLoader, ScriptSource, UuidIds, ID_PREFIX,
    SCRIPT_ONCE_KEY,
};

/// Default time a single diagram gets before the pass gives up on it.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to one diagram block during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Rendered {
        id: String,
        markup: String,
    },
    Failed {
        id: String,
        message: String,
        markup: String,
    },
    /// Already processed, or nothing to draw.
    Skipped,
    /// The library did not answer in time, the block stays unprocessed.
    TimedOut {
        id: String,
    },
}

impl BlockOutcome {
    /// The new content of the block, if it gets one.
    pub fn markup(&self) -> Option<&str> {
        match self {
            BlockOutcome::Rendered { markup, .. } | BlockOutcome::Failed { markup, .. } => {
                Some(markup)
            }
            BlockOutcome::Skipped | BlockOutcome::TimedOut { .. } => None,
        }
    }
}

/// Per block outcomes of a pass, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderReport {
    outcomes: Vec<BlockOutcome>,
}

impl RenderReport {
    pub fn outcomes(&self) -> &[BlockOutcome] {
        &self.outcomes
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn rendered(&self) -> usize {
        self.count(|outcome| matches!(outcome, BlockOutcome::Rendered { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, BlockOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, BlockOutcome::Skipped))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|outcome| matches!(outcome, BlockOutcome::TimedOut { .. }))
    }

    fn count<F: Fn(&BlockOutcome) -> bool>(&self, filter: F) -> usize {
        self.outcomes.iter().filter(|outcome| filter(outcome)).count()
    }
}

/// Renders the mermaid blocks of documents.
///
/// The renderer stands for one document lifetime: the library script is loaded at most
/// once across all passes, and the library is only initialized again when a pass asks
/// for a different configuration.
pub struct MermaidRenderer<S, L, I = UuidIds> {
    loader: ScriptLoader<S>,
    library: LibraryHandle<L>,
    ids: I,
    render_timeout: Option<Duration>,
}

impl<S: ScriptSource + 'static, L: DiagramLibrary> MermaidRenderer<S, L> {
    pub fn new(source: S, library: L) -> Self {
        Self::with_ids(source, library, UuidIds)
    }
}

impl MermaidRenderer<CommandScriptSource, CommandLibrary> {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self::new(settings.script_source(), settings.command_library())
            .render_timeout(Some(settings.render_timeout()))
    }
}

impl<S, L, I> MermaidRenderer<S, L, I>
where
    S: ScriptSource + 'static,
    L: DiagramLibrary,
    I: IdGenerator,
{
    pub fn with_ids(source: S, library: L, ids: I) -> Self {
        Self {
            loader: ScriptLoader::new(source),
            library: LibraryHandle::new(library),
            ids,
            render_timeout: Some(DEFAULT_RENDER_TIMEOUT),
        }
    }

    /// Give up on a single diagram after `timeout`, [`DEFAULT_RENDER_TIMEOUT`] unless
    /// changed. With `None` a library call that never settles keeps the pass from
    /// finishing.
    pub fn render_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn loader(&self) -> &ScriptLoader<S> {
        &self.loader
    }

    pub fn library(&self) -> &LibraryHandle<L> {
        &self.library
    }

    /// Render every unprocessed mermaid block below `root` (the whole document when
    /// `None`).
    ///
    /// Nothing is loaded when there are no blocks. A failing script load aborts the pass
    /// and leaves `document` untouched; a failing diagram gets an inline error instead.
    pub async fn render(
        &self,
        document: &mut Document,
        root: Option<&str>,
        cdn: &str,
        theme: &str,
    ) -> Result<RenderReport> {
        let selector = CandidateSelector::new(root)?;
        let blocks = list_candidates(document, &selector)?;
        if blocks.is_empty() {
            log::trace!("No diagrams in {}", selector.as_str());
            return Ok(RenderReport::default());
        }

        let script = self
            .loader
            .ensure_loaded(&script_url(cdn), SCRIPT_ONCE_KEY)
            .await?;

        self.library.apply(&RenderConfig::for_theme(theme), &script);

        let outcomes =
            future::join_all(blocks.iter().map(|block| self.render_block(block))).await;

        apply_outcomes(document, &selector, &outcomes)?;

        let report = RenderReport { outcomes };
        log::debug!(
            "Rendered {} diagrams, {} failed, {} skipped, {} timed out",
            report.rendered(),
            report.failed(),
            report.skipped(),
            report.timed_out()
        );

        Ok(report)
    }

    /// [`render`](Self::render) with the root, CDN and theme taken from `settings`.
    pub async fn render_with(
        &self,
        document: &mut Document,
        settings: &RenderSettings,
    ) -> Result<RenderReport> {
        self.render(
            document,
            settings.root.as_deref(),
            &settings.cdn,
            &settings.theme,
        )
        .await
    }

    async fn render_block(&self, block: &DiagramBlock) -> BlockOutcome {
        if block.is_processed() {
            log::trace!("Diagram {} is already rendered", block.index());
            return BlockOutcome::Skipped;
        }
        if block.source().trim().is_empty() {
            log::trace!("Diagram {} is empty", block.index());
            return BlockOutcome::Skipped;
        }

        let id = format!("{ID_PREFIX}{}", self.ids.next_id());
        let render = self.library.library().render(&id, block.source());

        let result = match self.render_timeout {
            Some(timeout) => {
                let settled = tokio::time::timeout(timeout, render).await;
                match settled {
                    Ok(result) => result,
                    Err(_) => {
                        log::warn!("{id}: no diagram after {timeout:?}, leaving it for later");
                        return BlockOutcome::TimedOut { id };
                    }
                }
            }
            None => render.await,
        };

        match result {
            Ok(svg) => BlockOutcome::Rendered { id, markup: svg },
            Err(failure) => {
                log::warn!("{id}: {}", failure.message());

                BlockOutcome::Failed {
                    markup: error_fragment(&failure),
                    message: failure.message().to_string(),
                    id,
                }
            }
        }
    }
}
