use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("failed to build worker team of {threads} threads: {source}")]
    PoolBuild {
        threads: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
    #[error("invalid thread count: {0}")]
    InvalidThreadCount(usize),
}

pub type Result<T> = std::result::Result<T, ThreadError>;
