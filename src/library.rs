use std::sync::{Arc, Mutex, PoisonError};

use crate::{RenderConfig, Script};

/// Why a diagram could not be rendered.
///
/// Libraries that draw something for broken diagrams (mermaid's "syntax error" graphic)
/// hand it back as the placeholder, it ends up above the message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RenderFailure {
    message: String,
    placeholder: Option<String>,
}

impl RenderFailure {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            placeholder: None,
        }
    }

    pub fn with_placeholder<S: Into<String>>(mut self, placeholder: S) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn placeholder(&self) -> Option<&str> {
        self.placeholder.as_deref()
    }
}

/// The diagram library that does the actual drawing.
pub trait DiagramLibrary {
    /// Bring the library up from the loaded `script` and apply `config` to every later
    /// render.
    fn initialize(&self, config: &RenderConfig, script: &Script);

    /// Render `source` into SVG markup, addressing the output as `id`.
    #[allow(async_fn_in_trait)]
    async fn render(&self, id: &str, source: &str) -> Result<String, RenderFailure>;
}

/// Owns a library and remembers the configuration and script last applied to it, so the
/// library only gets initialized again when one of them changes.
pub struct LibraryHandle<L> {
    library: L,
    applied: Mutex<Option<(RenderConfig, Arc<Script>)>>,
}

impl<L: DiagramLibrary> LibraryHandle<L> {
    pub fn new(library: L) -> Self {
        Self {
            library,
            applied: Mutex::new(None),
        }
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    /// Returns whether the library had to be initialized.
    pub fn apply(&self, config: &RenderConfig, script: &Arc<Script>) -> bool {
        let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((applied_config, applied_script)) = applied.as_ref() {
            if applied_config == config && Arc::ptr_eq(applied_script, script) {
                log::trace!("Library configuration unchanged");
                return false;
            }
        }

        log::info!(
            "Initializing diagram library from {} with {} theme",
            script.url(),
            config.theme().unwrap_or("default")
        );
        self.library.initialize(config, script);
        *applied = Some((config.clone(), Arc::clone(script)));

        true
    }

    pub fn applied(&self) -> Option<RenderConfig> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(config, _)| config.clone())
    }
}
