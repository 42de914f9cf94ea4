//! Script generation for the analytics engine.
//!
//! Plans are lowered into expression trees ([`expr`]), serialized through a
//! token stream ([`token`]) and laid out by an indentation-aware writer
//! ([`format`]). [`render`] assembles the full pipelines.

pub mod expr;
pub mod format;
pub mod render;
pub mod token;

pub use expr::{JsExpr, JsExprExt};
pub use format::{Indent, IndentWriter};
pub use render::{render_connection_check, render_experiment, render_metric_value};
pub use token::{Token, TokenStream};
