//! Rich diagnostic error types for semblance.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly
//! what went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for semblance.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum SemblanceError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Query engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("query could not be parsed by the backend: {message}")]
    #[diagnostic(
        code(semblance::query::language),
        help(
            "The query text was rejected by the backend query compiler. \
             Check the syntax against the backend's query language, and make \
             sure interpolated constants come from `QueryEngine::constants()`."
        )
    )]
    Language { message: String },

    #[error("query exceeded its time budget of {budget_ms}ms")]
    #[diagnostic(
        code(semblance::query::timeout),
        help(
            "The backend did not answer within the configured timeout. \
             Increase `query_timeout_ms`, simplify the query, or check \
             backend load. No partial results are returned."
        )
    )]
    Timeout { budget_ms: u64 },

    #[error("backend knowledge base unavailable: {message}")]
    #[diagnostic(
        code(semblance::query::backend_unavailable),
        help(
            "The bound knowledge base could not be reached. This is transient: \
             read-only requests may be retried once the backend recovers."
        )
    )]
    BackendUnavailable { message: String },

    #[error("unexpected result shape from backend: {message}")]
    #[diagnostic(
        code(semblance::query::result_shape),
        help(
            "The backend answered with a result form the engine cannot map to \
             bindings (e.g. a graph result from a select query). Rewrite the \
             query as ASK or SELECT."
        )
    )]
    ResultShape { message: String },
}

// ---------------------------------------------------------------------------
// Matcher errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MatchError {
    #[error("match cancelled by the caller")]
    #[diagnostic(
        code(semblance::matcher::cancelled),
        help(
            "The request was cancelled (typically the transport dropped the \
             connection) before matching finished. No result was produced."
        )
    )]
    Cancelled,

    #[error("matcher backend sync failed: {message}")]
    #[diagnostic(
        code(semblance::matcher::sync),
        help(
            "A matcher could not mirror a store mutation into its backend. \
             The matcher's view may lag the store until the next successful \
             write; check backend connectivity."
        )
    )]
    Sync { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("instance not found: {identity}")]
    #[diagnostic(
        code(semblance::store::not_found),
        help("No instance with this identity exists in the store. Verify the identity is correct.")
    )]
    NotFound { identity: String },

    #[error("identity already present: {identity}")]
    #[diagnostic(
        code(semblance::store::identity_conflict),
        help(
            "A strict insert expected the identity to be absent, but an \
             instance is already stored under it. Use upsert mode to replace, \
             or pick a fresh identity."
        )
    )]
    IdentityConflict { identity: String },

    #[error("no registered matcher can answer this query shape")]
    #[diagnostic(
        code(semblance::store::no_capable_matcher),
        help(
            "Every registered matcher declined the query via `handles_query`. \
             Register a matcher that supports this shape (e.g. disjunctive \
             queries need the structural matcher) rather than relying on \
             silent partial matching."
        )
    )]
    NoCapableMatcher,

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(semblance::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {message}")]
    #[diagnostic(
        code(semblance::store::database),
        help(
            "The embedded database encountered a transaction error. \
             This may indicate corruption; try a fresh data directory."
        )
    )]
    Database { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(semblance::store::serde),
        help(
            "Failed to serialize or deserialize an instance document. \
             This usually means the persisted format changed between versions."
        )
    )]
    Serialization { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Match(#[from] MatchError),
}

// ---------------------------------------------------------------------------
// Dispatch errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DispatchError {
    #[error("missing required request attribute: {parameter}")]
    #[diagnostic(
        code(semblance::dispatch::missing_parameter),
        help(
            "Every request must carry the CATEGORY and TYPE attributes. \
             Add the named attribute and resend; this is a caller defect \
             and will not succeed on retry without it."
        )
    )]
    MissingParameter { parameter: String },

    #[error("unrecognised action: category \"{category}\", type \"{action_type}\"")]
    #[diagnostic(
        code(semblance::dispatch::unrecognised_action),
        help(
            "The (CATEGORY, TYPE) pair is not in the action catalogue. \
             Valid categories are STORE and MATCH; check the submitted \
             values against the protocol documentation."
        )
    )]
    UnrecognisedAction {
        category: String,
        action_type: String,
    },

    #[error("malformed request body: {message}")]
    #[diagnostic(
        code(semblance::dispatch::bad_body),
        help(
            "The request body did not contain the fields this action expects. \
             Check the body document against the action's documented shape."
        )
    )]
    BadBody { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    #[diagnostic(
        code(semblance::config::read),
        help("Check that the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    #[diagnostic(
        code(semblance::config::parse),
        help("The config file is not valid TOML for this tool. {message}")
    )]
    Parse { path: String, message: String },
}

/// Convenience alias for functions returning semblance results.
pub type SemblanceResult<T> = std::result::Result<T, SemblanceError>;

/// Stable error code for an error, mirroring its miette diagnostic code.
///
/// Used by the dispatcher to tag structured error responses so remote
/// callers can distinguish error kinds without parsing messages.
pub fn error_code(err: &SemblanceError) -> &'static str {
    match err {
        SemblanceError::Store(e) => store_code(e),
        SemblanceError::Match(e) => match_code(e),
        SemblanceError::Query(e) => query_code(e),
        SemblanceError::Dispatch(e) => match e {
            DispatchError::MissingParameter { .. } => "semblance::dispatch::missing_parameter",
            DispatchError::UnrecognisedAction { .. } => "semblance::dispatch::unrecognised_action",
            DispatchError::BadBody { .. } => "semblance::dispatch::bad_body",
            DispatchError::Store(e) => store_code(e),
        },
        SemblanceError::Config(e) => match e {
            ConfigError::Read { .. } => "semblance::config::read",
            ConfigError::Parse { .. } => "semblance::config::parse",
        },
    }
}

fn store_code(err: &StoreError) -> &'static str {
    match err {
        StoreError::NotFound { .. } => "semblance::store::not_found",
        StoreError::IdentityConflict { .. } => "semblance::store::identity_conflict",
        StoreError::NoCapableMatcher => "semblance::store::no_capable_matcher",
        StoreError::Io { .. } => "semblance::store::io",
        StoreError::Database { .. } => "semblance::store::database",
        StoreError::Serialization { .. } => "semblance::store::serde",
        StoreError::Match(e) => match_code(e),
    }
}

fn match_code(err: &MatchError) -> &'static str {
    match err {
        MatchError::Cancelled => "semblance::matcher::cancelled",
        MatchError::Sync { .. } => "semblance::matcher::sync",
        MatchError::Query(e) => query_code(e),
    }
}

fn query_code(err: &QueryError) -> &'static str {
    match err {
        QueryError::Language { .. } => "semblance::query::language",
        QueryError::Timeout { .. } => "semblance::query::timeout",
        QueryError::BackendUnavailable { .. } => "semblance::query::backend_unavailable",
        QueryError::ResultShape { .. } => "semblance::query::result_shape",
    }
}
