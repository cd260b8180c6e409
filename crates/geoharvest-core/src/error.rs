use thiserror::Error;

/// Application-wide error types.
///
/// Every fallible operation in the geoharvest crates returns this type. The
/// variants follow the harvester's failure taxonomy: configuration problems
/// are rejected before anything changes, protocol failures are fatal only
/// before a run has made progress, and record or store failures are counted
/// per record without stopping the run.
///
/// # Error Conversion
///
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// # Examples
///
/// ```no_run
/// use geoharvest_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::NodeNotFound("geocat".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Wraps errors from SQLx, including connection failures and
    /// constraint violations.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// HTTP client could not be built or a request failed in an
    /// unclassified way.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A harvester configuration draft failed validation.
    ///
    /// The live configuration is left untouched when this is returned.
    #[error("Invalid harvester configuration: {0}")]
    ConfigValidation(String),

    /// No harvester node is registered under the given id.
    #[error("Harvester node not found: {0}")]
    NodeNotFound(String),

    /// A harvester node with the given id is already registered.
    #[error("Harvester node already exists: {0}")]
    DuplicateNode(String),

    /// A run was requested for a node that already has one in flight.
    #[error("Harvester node is already running: {0}")]
    AlreadyRunning(String),

    /// The remote endpoint could not be reached.
    ///
    /// Covers DNS failures, refused connections and resets.
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    /// The remote endpoint answered, but not with a usable protocol response.
    ///
    /// Covers OWS exception reports, unexpected HTTP statuses and
    /// unparsable documents.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A single remote record was malformed.
    #[error("Record error: {0}")]
    RecordError(String),

    /// A record's schema is not supported by the metadata store.
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    /// The metadata store rejected a write.
    #[error("Store error: {0}")]
    StoreError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// Configuration file error.
    ///
    /// Reading or parsing `harvesters.toml` failed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Try: docker compose up -d".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::Unreachable(msg) => {
                format!(
                    "Cannot reach catalog endpoint: {}\n   Check the endpoint URL and your network connection.",
                    msg
                )
            }
            AppError::ProtocolError(msg) => {
                format!(
                    "The endpoint did not answer like a CSW 2.0.2 catalog: {}",
                    msg
                )
            }
            AppError::ConfigValidation(msg) => {
                format!(
                    "Harvester configuration rejected: {}\n   The previous configuration is still active.",
                    msg
                )
            }
            AppError::AlreadyRunning(node) => {
                format!(
                    "A harvest for '{}' is already in progress. Wait for it to finish or cancel it.",
                    node
                )
            }
            AppError::Timeout(secs) => {
                format!(
                    "Request timed out after {} seconds.\n   The catalog may be overloaded. Try again later.",
                    secs
                )
            }
            AppError::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your harvesters.toml file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if a failed HTTP request may succeed when repeated.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoharvest_core::error::AppError;
    ///
    /// assert!(AppError::Unreachable("connection reset".to_string()).is_retryable());
    /// assert!(AppError::RateLimitExceeded.is_retryable());
    /// assert!(!AppError::ProtocolError("ExceptionReport".to_string()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Unreachable(_) | AppError::Timeout(_) | AppError::RateLimitExceeded
        )
    }

    /// Returns true if this error ends a run that has not processed a record yet.
    ///
    /// Transport and protocol failures before the first record mean the
    /// endpoint is unusable for this run. Record and store errors never are.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Unreachable(_)
                | AppError::ProtocolError(_)
                | AppError::Timeout(_)
                | AppError::RateLimitExceeded
                | AppError::ClientError(_)
                | AppError::InvalidUrl(_)
        )
    }

    /// Returns true if the metadata store rejected a record for its schema.
    pub fn is_unknown_schema(&self) -> bool {
        matches!(self, AppError::UnknownSchema(_))
    }
}
