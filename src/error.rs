use std::fmt;

#[cfg(debug_assertions)]
mod error_impl {
    use super::{Error, ErrorExt, ErrorKind};

    pub type ErrorInner = Box<Chained>;

    #[derive(Clone, Debug)]
    pub struct Chained {
        this: &'static ErrorKind,
        src: Option<Error>,
    }
    impl ErrorExt for Error {
        #[inline]
        fn kind(&self) -> ErrorKind {
            *self.inner.this
        }
        #[inline]
        fn source(&self) -> Option<&Error> {
            self.inner.src.as_ref()
        }
        #[inline]
        fn chain_ctx(self, ctx: &'static ErrorKind) -> Error {
            Error {
                inner: Chained {
                    this: ctx,
                    src: Some(self),
                }
                .into(),
            }
        }
    }
    impl From<&'static ErrorKind> for Error {
        #[inline]
        fn from(kind: &'static ErrorKind) -> Error {
            Error {
                inner: Chained {
                    this: kind,
                    src: None,
                }
                .into(),
            }
        }
    }
}

#[cfg(not(debug_assertions))]
mod error_impl {
    use super::{Error, ErrorExt, ErrorKind};

    /// In release mode errors are just a thin pointer.
    pub type ErrorInner = &'static ErrorKind;
    impl ErrorExt for Error {
        #[inline]
        fn kind(&self) -> ErrorKind {
            *self.inner
        }
        #[inline]
        fn source(&self) -> Option<&Error> {
            None
        }
        #[inline]
        fn chain_ctx(self, ctx: &'static ErrorKind) -> Error {
            Error { inner: ctx }
        }
    }
    impl From<&'static ErrorKind> for Error {
        #[inline]
        fn from(inner: &'static ErrorKind) -> Error {
            Error { inner }
        }
    }
}

/// Represents an error while decoding, encoding or sequencing MIDI data.
///
/// This type wraps an `ErrorKind` and includes the chain of contexts in debug mode.
/// In release mode it is a newtype wrapper around `&'static ErrorKind`, so the `Error::source`
/// method always returns `None`.
///
/// Errors are always surfaced synchronously to the caller of the failing operation.
#[derive(Clone)]
pub struct Error {
    inner: self::error_impl::ErrorInner,
}
impl Error {
    /// Create a new error with the given `ErrorKind`.
    #[inline]
    pub fn new(kind: &'static ErrorKind) -> Error {
        Error::from(kind)
    }

    /// More information about the error itself.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        ErrorExt::kind(self)
    }

    /// The underlying cause for this error.
    ///
    /// Note that this method will always return `None` in release mode, since error chains
    /// are not tracked in release.
    #[inline]
    pub fn source(&self) -> Option<&Error> {
        ErrorExt::source(self)
    }

    /// The innermost error of the chain, which is usually the most specific one.
    pub fn root_kind(&self) -> ErrorKind {
        let mut err = self;
        while let Some(src) = err.source() {
            err = src;
        }
        err.kind()
    }
}
impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.kind(), f)
    }
}
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind())?;
        let mut maybe_src = self.source();
        while let Some(src) = maybe_src {
            writeln!(f)?;
            write!(f, "  caused by: {}", src.kind())?;
            maybe_src = src.source();
        }
        Ok(())
    }
}
impl std::error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

trait ErrorExt {
    fn kind(&self) -> ErrorKind;
    fn source(&self) -> Option<&Error>;
    fn chain_ctx(self, ctx: &'static ErrorKind) -> Error;
}

/// The category of an error.
///
/// Specific info about what went wrong is provided as a non-normative string literal.
/// Code should match on the variant, never on the message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// A status, meta type or data byte is out of range, or a message is internally
    /// inconsistent (for example a meta message whose declared length disagrees with its data).
    #[error("malformed midi message: {0}")]
    MalformedMessage(&'static str),

    /// There were not enough bytes to satisfy a declared length, including a variable-length
    /// quantity that never terminates.
    #[error("truncated midi data: {0}")]
    TruncatedData(&'static str),

    /// A Standard Midi File is inconsistent.
    ///
    /// Only raised by the file reader in strict mode; permissive reading skips over the fault.
    #[error("malformed midi file: {0}")]
    MalformedFile(&'static str),

    /// The division type of a sequence or file header is not one of PPQ or the four SMPTE rates.
    #[error("unsupported division type: {0}")]
    UnsupportedDivisionType(&'static str),

    /// An argument was rejected before any state was modified.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// No device, sink or source satisfying the request is available.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(&'static str),

    /// The underlying reader or writer failed.
    #[error("i/o error: {0}")]
    Io(&'static str),
}
impl ErrorKind {
    /// Get the informative message on what exactly went wrong.
    #[inline]
    pub fn message(&self) -> &'static str {
        match *self {
            ErrorKind::MalformedMessage(msg)
            | ErrorKind::TruncatedData(msg)
            | ErrorKind::MalformedFile(msg)
            | ErrorKind::UnsupportedDivisionType(msg)
            | ErrorKind::InvalidParameter(msg)
            | ErrorKind::DeviceUnavailable(msg)
            | ErrorKind::Io(msg) => msg,
        }
    }
}

macro_rules! err_malformed_msg {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::MalformedMessage($msg);
        ERR_KIND
    }};
}
macro_rules! err_truncated {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::TruncatedData($msg);
        ERR_KIND
    }};
}
macro_rules! err_malformed_file {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::MalformedFile($msg);
        ERR_KIND
    }};
}
macro_rules! err_division {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::UnsupportedDivisionType($msg);
        ERR_KIND
    }};
}
macro_rules! err_param {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::InvalidParameter($msg);
        ERR_KIND
    }};
}
macro_rules! err_device {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::DeviceUnavailable($msg);
        ERR_KIND
    }};
}
macro_rules! err_io {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::Io($msg);
        ERR_KIND
    }};
}

pub(crate) trait ResultExt<T> {
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error>;
}
impl<T> ResultExt<T> for StdResult<T, Error> {
    #[inline]
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error> {
        self.map_err(|err| err.chain_ctx(ctx))
    }
}
impl<T> ResultExt<T> for StdResult<T, &'static ErrorKind> {
    #[inline]
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error> {
        self.map_err(|errkind| Error::from(errkind).chain_ctx(ctx))
    }
}
impl<T> ResultExt<T> for std::io::Result<T> {
    #[inline]
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error> {
        self.map_err(|err| {
            log::debug!("i/o failure: {}", err);
            Error::from(ctx)
        })
    }
}

/// The result type used throughout the crate.
pub type Result<T> = StdResult<T, Error>;
pub(crate) use std::result::Result as StdResult;
