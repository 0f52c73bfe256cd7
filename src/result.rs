use super::errors::{PoolError, SpawnError};

pub type PoolResult<T> = Result<T, PoolError>;

pub type SpawnResult<T> = Result<T, SpawnError>;
