use std::io::Read;

use log::warn;

use crate::error::{LinkError, ProtocolError, Result};

use super::codec::{read_int, read_line};

/// Trailing status of a command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    InvalidItem,
    Warning(String),
    Error(String),
    License,
}

impl Status {
    /// Reads the status code and, for warnings and errors, the message line.
    ///
    /// Codes outside the known set consume nothing else and are a protocol error.
    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        match read_int(r)? {
            0 => Ok(Status::Ok),
            1 => Ok(Status::InvalidItem),
            2 => Ok(Status::Warning(read_line(r)?)),
            3 => Ok(Status::Error(read_line(r)?)),
            9 => Ok(Status::License),
            code => Err(ProtocolError::UnknownStatus(code).into()),
        }
    }

    /// Turns the status into the call outcome. Warnings are logged, not raised.
    pub fn into_result(self) -> Result<()> {
        match self {
            Status::Ok => Ok(()),
            Status::Warning(message) => {
                warn!("station warning: {message}");
                Ok(())
            }
            Status::InvalidItem => Err(LinkError::InvalidItem),
            Status::Error(message) => Err(LinkError::Remote(message)),
            Status::License => Err(LinkError::License),
        }
    }
}
