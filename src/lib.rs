//! Compiles Django-style templates into generated renderer code.
//!
//! Text, variables and single-test conditionals are translated directly.
//! Every other node is serialized into the generated module and rendered
//! through the node interpreter at run time, so a compiled template always
//! produces the same output as [`Template::render`].
//!
//! ```
//! use compilate::{Context, compile};
//!
//! let template = compile("Hello {% if name %}{{ name }}{% else %}stranger{% endif %}!").unwrap();
//!
//! let mut context = Context::new();
//! assert_eq!(template.render(&context), "Hello stranger!");
//!
//! context.insert("name", "World");
//! assert_eq!(template.render(&context), "Hello World!");
//! ```

mod ast;
mod codegen;
mod compiler;
mod config;
mod engine;
mod error;
mod interface;
mod parser;
mod program;
mod registry;
mod template;
mod toolchain;

// Public exports.
pub use ast::{Node, Renderable};
pub use compiler::{Compiler, GeneratedSource};
pub use config::CompileOptions;
pub use engine::CompilateEngine;
pub use error::{
    CompilateError, CompilateResult, ParseError, ParseErrorKind, ToolchainError, ToolchainErrorKind,
    UnsupportedFeature,
};
pub use interface::{CompilateInterface, Context, ResolvedContext, Value};
pub use parser::MAX_BLOCK_DEPTH;
pub use program::LoadedModule;
pub use registry::FallbackRegistry;
pub use template::{CompiledTemplate, Template, compile};
pub use toolchain::{Module, NativeToolchain, Toolchain};
