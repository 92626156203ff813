/// Errors raised while configuring a test run or persisting its artifacts. Bugs found in the
/// program under test are not errors; see [`Bug`](crate::Bug).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown scheduling strategy `{0}`")]
    UnknownStrategy(String),

    #[error("invalid parameter for strategy `{strategy}`: {reason}")]
    InvalidStrategyParameter { strategy: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid trace: {0}")]
    InvalidTrace(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
