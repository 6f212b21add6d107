//! Flotilla Pages: route table shared by the modules of one engine
//!
//! Modules register a page builder per route id while the engine initializes.
//! The embedded UI engine resolves a route through the table and asks the
//! builder for a [`PageSpec`]; how the page is painted is not our concern.
//!
//! # Example
//!
//! ```
//! use flotilla_pages::{PageBuilderTable, PageSpec, RouteSettings};
//!
//! let table = PageBuilderTable::new();
//! table.register("/home", "home", |settings: &RouteSettings| {
//!     Ok(PageSpec::from_settings(settings).titled("Home"))
//! });
//!
//! let page = table.build(&RouteSettings::new("/home")).unwrap();
//! assert_eq!(page.title.as_deref(), Some("Home"));
//! ```

pub mod settings;
pub mod table;

pub use settings::{PageSpec, RouteSettings};
pub use table::{PageBuilder, PageBuilderEntry, PageBuilderTable, RouteInfo, RouteOptions};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("PAGE/unknown route: {0}")]
    UnknownRoute(String),

    #[error("PAGE/build failed for {route}: {reason}")]
    BuildFailed { route: String, reason: String },
}
