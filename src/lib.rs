//! Client-side data core for the PIP scholarship administration panel.
//!
//! Collections live in a hosted record store. Views fetch them in pages,
//! join kelurahan names, filter and summarize locally, and push writes back
//! while keeping their local copy consistent with the store.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod import;
pub mod join;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod time;
pub mod validate;
pub mod views;

pub use config::{AppConfig, Backend, ConfigError, Connection};
pub use error::{AppError, AppResult};
pub use fetch::{fetch_all, fetch_all_as, FetchOutcome, DEFAULT_PAGE_SIZE};
pub use logging::{init_logging, LogScope};
pub use model::{Kelurahan, RecordId, Role, Status, Student, Submission, UserProfile};
pub use reconcile::Confirmation;
pub use session::{Identity, SessionProvider};
pub use store::{MemoryStore, RecordStore, RestStore, Select, SqliteStore};
pub use views::{
    DashboardView, KelurahanView, SearchView, StudentsView, SubmissionsView, UsersView,
    ViewContext,
};
