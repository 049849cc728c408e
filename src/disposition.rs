//! Dispositions and conversion of handler return values into them.

use std::error::Error;
use std::fmt;

use serde_json::Value;

/// What happens to a message once its handler has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Processed; mark the message complete.
    Ack,
    /// Not processed; abandon it so the broker redelivers.
    Retry,
    /// Invalid; send it to the dead-letter destination.
    Reject,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Ack => f.write_str("ack"),
            Disposition::Retry => f.write_str("retry"),
            Disposition::Reject => f.write_str("reject"),
        }
    }
}

/// Return types a handler may produce.
///
/// Anything that is not a [`Disposition`] counts as [`Disposition::Ack`];
/// an `Err` counts as a handler failure and is retried.
pub trait HandlerOutput: Send + 'static {
    fn into_disposition(self) -> Result<Disposition, Box<dyn Error + Send + Sync>>;
}

impl HandlerOutput for Disposition {
    fn into_disposition(self) -> Result<Disposition, Box<dyn Error + Send + Sync>> {
        Ok(self)
    }
}

impl HandlerOutput for () {
    fn into_disposition(self) -> Result<Disposition, Box<dyn Error + Send + Sync>> {
        Ok(Disposition::Ack)
    }
}

impl HandlerOutput for Option<Disposition> {
    fn into_disposition(self) -> Result<Disposition, Box<dyn Error + Send + Sync>> {
        Ok(self.unwrap_or(Disposition::Ack))
    }
}

impl HandlerOutput for Value {
    fn into_disposition(self) -> Result<Disposition, Box<dyn Error + Send + Sync>> {
        Ok(Disposition::Ack)
    }
}

impl HandlerOutput for bool {
    fn into_disposition(self) -> Result<Disposition, Box<dyn Error + Send + Sync>> {
        Ok(Disposition::Ack)
    }
}

impl<T, E> HandlerOutput for Result<T, E>
where
    T: HandlerOutput,
    E: Into<Box<dyn Error + Send + Sync>> + Send + 'static,
{
    fn into_disposition(self) -> Result<Disposition, Box<dyn Error + Send + Sync>> {
        match self {
            Ok(output) => output.into_disposition(),
            Err(err) => Err(err.into()),
        }
    }
}
