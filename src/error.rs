//! Error types for popd

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid listen address: {0}")]
    Addr(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
