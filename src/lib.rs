//! Dirload implement a two-phase bulk import engine for directory
//! backends. A directory backend persist one subtree of the directory
//! tree inside one container of an embedded key-value store, as a
//! collection of on-disk indexes - a naming index mapping each entry's
//! name to its entry-id, children/subtree indexes mapping an entry-id
//! to the ids of its immediate children and of its whole subtree, and
//! one index per (attribute, match-kind) pair holding posting lists of
//! entry-ids.
//!
//! Loading millions of entries through the normal transactional write
//! path is orders of magnitude too slow. Dirload reshape the problem
//! as an external merge-sort:
//!
//! * **Phase 1**, worker threads parse the entry stream, derive the
//!   keys for every index, and append records into bounded sort
//!   buffers. Filled buffers are sorted by a pool of sort threads and
//!   drained by per-index spill threads into sorted runs inside
//!   temporary run files.
//! * **Phase 2**, for each index the sorted runs are k-way merged,
//!   duplicate keys are aggregated into posting lists, and the result
//!   is bulk-inserted into the backing store.
//!
//! Until the import commits every rebuilt index is marked not-trusted;
//! a crashed or cancelled import is restarted from scratch.
//!
//! Refer to [bulk::Config] for the recognized options and to
//! [bulk::Importer] for the orchestration entry-point.

use std::{error, fmt, result};

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// use crate::Error;
/// err_at!(InvalidConfig, msg: "thread count {}", n)
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fs::read(file_path))
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fs::read(file_path), "reading {:?}", file_path)
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

pub mod bulk;
pub mod entry;
pub mod name;
pub mod schema;
pub mod store;
pub mod util;

pub use crate::bulk::{Config, ImportReport, Importer};

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;

/// Error variants that are returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the error
/// location. Per-entry parse and semantic failures are _not_ errors,
/// they are counted as rejections and the import continues.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidConfig(String, String),
    Fatal(String, String),
    IOError(String, String),
    DecodeFail(String, String),
    FailConvert(String, String),
    IPCFail(String, String),
    ThreadFail(String, String),
    StoreFail(String, String),
    Cancelled(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            InvalidConfig(p, msg) => write!(f, "{} InvalidConfig: {}", p, msg),
            Fatal(p, msg) => write!(f, "{} Fatal: {}", p, msg),
            IOError(p, msg) => write!(f, "{} IOError: {}", p, msg),
            DecodeFail(p, msg) => write!(f, "{} DecodeFail: {}", p, msg),
            FailConvert(p, msg) => write!(f, "{} FailConvert: {}", p, msg),
            IPCFail(p, msg) => write!(f, "{} IPCFail: {}", p, msg),
            ThreadFail(p, msg) => write!(f, "{} ThreadFail: {}", p, msg),
            StoreFail(p, msg) => write!(f, "{} StoreFail: {}", p, msg),
            Cancelled(p, msg) => write!(f, "{} Cancelled: {}", p, msg),
        }
    }
}

impl error::Error for Error {}

impl Error {
    /// Cancellation is terminal but not a defect, callers often treat
    /// it separately from real failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_, _))
    }
}
