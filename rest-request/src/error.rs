#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidInput {
    #[error("current verb ({0}) is an invalid REST verb")]
    InvalidVerb(String),

    #[error("invalid data input for post body, array expected")]
    ArrayExpected,

    #[error("no url set for request")]
    MissingUrl,

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

pub type StdResult<T, E> = std::result::Result<T, E>;

pub type Result<T> = std::result::Result<T, Error>;
