use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("unrecognized presence {0:?}, expected yes, no or any")]
    BadPresence(String),

    #[error("unrecognized role {0:?}, expected from, to or body")]
    BadRole(String),

    #[error("malformed rule {0:?}, expected CLUSTER_ID[:role=yes|no|any,...]")]
    BadRule(String),
}
