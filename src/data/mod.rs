//! Data access: in-memory frames, SQLite persistence and external collaborators

pub mod documents;
pub mod frame;
pub mod prices;
pub mod standardize;
pub mod store;

pub use documents::{ingest_documents, DocumentMeta, DocumentSource, IngestReport};
pub use frame::{Cell, Column, Frame};
pub use prices::{PriceSource, SqlitePriceSource, StaticPriceSource};
pub use standardize::{standardize, StandardizeSettings};
