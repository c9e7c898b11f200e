//! Persistence for users, revoked tokens and login replay records.
//!
//! Each store is a trait with a `PostgreSQL` implementation used by the server and an
//! in-memory implementation used by tests.

mod replay;
mod revocation;
mod users;

pub use replay::{InMemoryReplayStore, NonceRecord, PgReplayStore, ReplayStore, SaltRecord};
pub use revocation::{InMemoryRevocationStore, PgRevocationStore, RevocationStore, hash_token};
pub use users::{InMemoryUserStore, PgUserStore, UserStore};

use tracing::{Span, info_span};

/// Span wrapping a single database statement.
fn db_span(operation: &'static str, statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}
