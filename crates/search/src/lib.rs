//! Boolean role search over a job's cluster store, rendered as emails.

mod error;
mod finder;
mod render;

pub use error::{Result, SearchError};
pub use finder::{parse_role, Finder, Presence, SearchRule};
pub use render::{parse_date, render, render_all, sort_chronologically, RenderedEmail};
