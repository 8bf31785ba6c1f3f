//! Syntactic checks on a query.  Failing one is not an error of the
//! server: each failure maps to the rcode the client gets back.

use dns_types::protocol::types::{QueryClass, Rcode, RecordClass};

use crate::query::Query;

/// Longest query name accepted, in octets of its dotted form.
pub const NAME_MAX_LEN: usize = 255;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ValidationError {
    #[error("class {0} is not served")]
    RefusedClass(QueryClass),

    #[error("name is {0} octets long")]
    NameTooLong(usize),

    #[error("name contains characters outside [0-9A-Za-z-.]")]
    InvalidName,
}

impl ValidationError {
    pub fn rcode(self) -> Rcode {
        match self {
            ValidationError::RefusedClass(_) => Rcode::Refused,
            ValidationError::NameTooLong(_) => Rcode::FormatError,
            ValidationError::InvalidName => Rcode::NameError,
        }
    }
}

/// Checks which apply to every query, whatever its type.  The class
/// is checked before the length.
///
/// # Errors
///
/// If the class is not IN or CH, or the name is too long.
pub fn validate(query: &Query) -> Result<(), ValidationError> {
    match query.qclass {
        QueryClass::Record(RecordClass::IN | RecordClass::CH) => (),
        other => return Err(ValidationError::RefusedClass(other)),
    }

    if query.name.len() > NAME_MAX_LEN {
        return Err(ValidationError::NameTooLong(query.name.len()));
    }

    Ok(())
}

/// Check a name is 1 to 255 characters, all from `[0-9A-Za-z-.]`.
/// Only the handlers which build records out of the name call this.
///
/// # Errors
///
/// If the name is empty, too long, or has another character in it.
pub fn check_name(name: &str) -> Result<(), ValidationError> {
    let allowed = |c: u8| c.is_ascii_alphanumeric() || c == b'-' || c == b'.';

    if (1..=NAME_MAX_LEN).contains(&name.len()) && name.bytes().all(allowed) {
        Ok(())
    } else {
        Err(ValidationError::InvalidName)
    }
}
