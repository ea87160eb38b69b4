/*!
error module defines the error types used across the bgpstream pipeline.

Per-reader problems (a dump that cannot be opened, a corrupted entry) are
not errors: they are reified as records with the matching
[`RecordStatus`](crate::models::RecordStatus) so consumers see them in
time order. The variants here cover configuration mistakes and fatal
catalogue failures, the only conditions that abort the stream.
*/
use std::fmt::{Display, Formatter};
use std::{error::Error, fmt, io};

#[derive(Debug)]
pub enum BgpStreamError {
    /// Invalid user configuration: bad filter value, unknown data
    /// interface, interval with begin > end. Fails `start`.
    ConfigError(String),
    /// The broker returned a response that cannot be valid under the
    /// protocol (e.g. syntactically broken JSON) even after retries.
    BrokerError(String),
    /// A local manifest (csv / sqlite / singlefile) is unusable.
    CatalogueError(String),
    IoError(io::Error),
    #[cfg(feature = "sqlite")]
    SqliteError(rusqlite::Error),
}

impl Error for BgpStreamError {}

impl Display for BgpStreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BgpStreamError::ConfigError(s) => write!(f, "configuration error: {s}"),
            BgpStreamError::BrokerError(s) => write!(f, "broker error: {s}"),
            BgpStreamError::CatalogueError(s) => write!(f, "catalogue error: {s}"),
            BgpStreamError::IoError(e) => write!(f, "io error: {e}"),
            #[cfg(feature = "sqlite")]
            BgpStreamError::SqliteError(e) => write!(f, "sqlite error: {e}"),
        }
    }
}

impl From<io::Error> for BgpStreamError {
    fn from(error: io::Error) -> Self {
        BgpStreamError::IoError(error)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for BgpStreamError {
    fn from(error: rusqlite::Error) -> Self {
        BgpStreamError::SqliteError(error)
    }
}
