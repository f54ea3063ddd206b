use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::toolchain::{NativeToolchain, Toolchain};

/// Options controlling how templates are parsed, staged and loaded.
///
/// # Example
///
/// ```
/// use compilate::{CompileOptions, CompiledTemplate, Context};
///
/// let options = CompileOptions::new().debug(true);
/// let template = CompiledTemplate::with_options("Hi {{ name }}", &options).unwrap();
///
/// let mut context = Context::new();
/// context.insert("name", "there");
/// assert_eq!(template.render(&context), "Hi there");
/// ```
#[derive(Debug, Clone)]
pub struct CompileOptions {
    debug: bool,
    staging_dir: Option<PathBuf>,
    toolchain: Arc<dyn Toolchain>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            debug: false,
            staging_dir: None,
            toolchain: Arc::new(NativeToolchain),
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse templates in debug mode, producing node variants that record
    /// their origin in the template source.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Directory generated source is staged in. Defaults to the system
    /// temporary directory.
    pub fn staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// The service that turns staged source into a loaded module.
    pub fn toolchain<T: Toolchain + 'static>(self, toolchain: T) -> Self {
        self.shared_toolchain(Arc::new(toolchain))
    }

    pub fn shared_toolchain(mut self, toolchain: Arc<dyn Toolchain>) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub const fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn staging_dir_path(&self) -> Option<&Path> {
        self.staging_dir.as_deref()
    }

    pub fn toolchain_ref(&self) -> &dyn Toolchain {
        self.toolchain.as_ref()
    }
}
