// src/db/mod.rs

pub mod backend;
pub mod connection;
pub mod elastic;
pub mod process;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use backend::{Document, DocumentBackend, DocumentFailure, Metadata, Query};
pub use connection::{ConnectionGuard, ConnectionSettings, ConnectionState, Connector, StorageConnection};
pub use elastic::{ElasticClient, ElasticConnector};
pub use process::{DockerProcess, EmbeddedProcess, ProcessManager};
pub use schema::{FieldType, Schema};
pub use sqlite::{SqliteClient, SqliteConnector};
pub use store::{
    BatchFailure, BatchResult, Collection, Dataset, DocumentStore, StoreSettings, UpsertOptions,
    DEFAULT_PAGE_SIZE,
};
