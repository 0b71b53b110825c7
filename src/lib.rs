//! # cloudql
//!
//! > **Query cloud provider REST APIs with SQL.**
//!
//! cloudql compiles SQL statements into HTTP calls against a provider's
//! discovery-described REST API, runs them and turns the JSON responses into
//! rows.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use cloudql::prelude::*;
//!
//! let mut session = Session::new(RuntimeConfig::load_default()?)?;
//! let outputs = session
//!     .execute("SELECT name, status FROM google.compute.instances WHERE project = 'p' AND zone = 'z'")
//!     .await;
//! ```
//!
//! ## Pipeline
//!
//! | Stage      | Module                 | Produces                     |
//! |------------|------------------------|------------------------------|
//! | Parse      | [`parser`]             | [`ast::Statement`]           |
//! | Resolve    | [`taxonomy`]           | provider, service, resource, method |
//! | Analyze    | [`analyzer`]           | validated [`analyzer::Analysis`] |
//! | Build      | [`params`], [`request`] | the HTTP request             |
//! | Plan       | [`plan`]               | cached [`plan::Plan`]        |
//! | Execute    | [`primitive`], [`monitor`] | [`output::ExecutorOutput`] |

pub mod analyzer;
pub mod ast;
pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod monitor;
pub mod output;
pub mod params;
pub mod parser;
pub mod plan;
pub mod primitive;
pub mod provider;
pub mod request;
pub mod schema;
pub mod session;
pub mod taxonomy;
pub mod template;
pub mod transport;

pub mod prelude {
    pub use crate::ast::Statement;
    pub use crate::config::{ErrorPresentation, OutputFormat, RuntimeConfig};
    pub use crate::error::*;
    pub use crate::output::{ExecutorOutput, RenderOptions, ResultSet, render};
    pub use crate::parser::parse;
    pub use crate::provider::{GoogleProvider, Provider};
    pub use crate::session::Session;
}

/// Parse a single statement.
///
/// # Example
///
/// ```
/// use cloudql::parse;
///
/// let stmt = parse("SELECT name FROM google.compute.instances").unwrap();
/// assert_eq!(stmt.kind(), "SELECT");
/// ```
pub fn parse(input: &str) -> Result<ast::Statement, error::CloudqlError> {
    parser::parse(input)
}
