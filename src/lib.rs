//! Air-quality observation ingester.
//!
//! Pages through the data.gov.in resource API ([`fetcher`]), keys each
//! observation by a content hash ([`hash`]) and appends the new ones to an
//! append-only SQLite log ([`db`]).

pub mod db;
pub mod error;
pub mod fetcher;
pub mod hash;
pub mod record;
pub mod settings;

pub use db::{Ingestor, InsertCount};
pub use error::{IngestError, Result};
pub use fetcher::{Fetcher, HttpSource, PageSource};
pub use hash::{stable_hash, RecordHash};
pub use record::Observation;
pub use settings::{Filters, Settings};
