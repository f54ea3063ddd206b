use std::{fmt, io::Write, path::Path};

use crate::{
    config::CompileOptions,
    error::{CompilateResult, ToolchainError, ToolchainErrorKind},
    interface::Context,
    program,
};

/// A loaded renderer module.
///
/// Implementations must be safe to call from several threads at once; the
/// only state a module may hold is read-only after load.
pub trait Module: fmt::Debug + Send + Sync {
    /// Flattens `chain` and renders the module's template against it.
    fn render(&self, chain: &Context) -> String;
}

/// Turns generated source into a loaded [`Module`].
pub trait Toolchain: fmt::Debug + Send + Sync {
    /// Compiles the source staged at `source_path` and loads it.
    ///
    /// The file only exists for the duration of this call.
    ///
    /// # Errors
    /// Any failure to read, compile or load the source.
    fn compile_and_load(&self, source_path: &Path) -> Result<Box<dyn Module>, ToolchainError>;
}

/// The default toolchain: compiles generated source in-process into a tree
/// of closures.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeToolchain;

impl Toolchain for NativeToolchain {
    fn compile_and_load(&self, source_path: &Path) -> Result<Box<dyn Module>, ToolchainError> {
        let source = std::fs::read_to_string(source_path).map_err(|e| {
            ToolchainError::unpositioned(ToolchainErrorKind::Io(format!(
                "{}: {}",
                source_path.display(),
                e
            )))
        })?;
        let module = program::load(&source)?;
        tracing::debug!(
            path = %source_path.display(),
            fallback_nodes = module.fallback_nodes(),
            "loaded native module"
        );
        Ok(Box::new(module))
    }
}

/// Writes `source` to a temporary file and hands it to the configured
/// toolchain. The file is removed when this returns, on success or failure.
pub(crate) fn stage_and_load(
    source: &str,
    options: &CompileOptions,
) -> CompilateResult<Box<dyn Module>> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("compilate-").suffix(".rtpl");
    let mut staged = match options.staging_dir_path() {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    staged.write_all(source.as_bytes())?;
    staged.flush()?;
    tracing::trace!(path = %staged.path().display(), "staged generated source");

    let loaded = options.toolchain_ref().compile_and_load(staged.path());
    drop(staged);
    loaded.map_err(Into::into)
}
