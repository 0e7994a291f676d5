use strand_core::StrandError;
use thiserror::Error;

use crate::value::Value;

/// Failure raised while evaluating steps.
///
/// Thrown script values are not faults: they travel through the
/// environment signal and can be caught by `Try`.
#[derive(Debug, Clone, Error)]
pub enum Fault {
    #[error("engine fault: {0}")]
    Engine(StrandError),
    #[error("security fault: {0}")]
    Security(StrandError),
    #[error("foreign invocation failed: {0}")]
    ForeignInvocation(HostFault),
}

impl Fault {
    pub fn engine(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine(StrandError::new(code, message))
    }

    pub fn security(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Security(StrandError::new(code, message))
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Engine(error) | Self::Security(error) => &error.code,
            Self::ForeignInvocation(_) => "BRIDGE_FOREIGN_INVOCATION",
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Engine(error) | Self::Security(error) => error.line,
            Self::ForeignInvocation(_) => None,
        }
    }

    pub(crate) fn or_line(self, line: usize) -> Self {
        if line == 0 {
            return self;
        }
        match self {
            Self::Engine(error) => Self::Engine(error.or_line(line)),
            Self::Security(error) => Self::Security(error.or_line(line)),
            other => other,
        }
    }
}

impl From<StrandError> for Fault {
    fn from(error: StrandError) -> Self {
        Self::Engine(error)
    }
}

impl From<HostFault> for Fault {
    /// Engine and security faults that crossed a proxy come back as themselves.
    fn from(fault: HostFault) -> Self {
        match fault.escaped {
            Some(inner) => *inner,
            None => Self::ForeignInvocation(fault),
        }
    }
}

/// Error raised by host code, or by a proxy whose callable threw.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HostFault {
    pub message: String,
    pub payload: Option<Box<Value>>,
    /// An engine or security fault raised inside a proxy callable.
    pub escaped: Option<Box<Fault>>,
}

impl HostFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: None,
            escaped: None,
        }
    }

    /// Wraps a value thrown by script code so it can cross the host boundary.
    pub fn thrown(value: Value) -> Self {
        Self {
            message: value.to_string(),
            payload: Some(Box::new(value)),
            escaped: None,
        }
    }

    /// Carries a fault through host code so it is re-raised unchanged on the
    /// script side instead of becoming a thrown value.
    pub fn escaped(fault: Fault) -> Self {
        match fault {
            Fault::ForeignInvocation(fault) => fault,
            other => Self {
                message: other.to_string(),
                payload: None,
                escaped: Some(Box::new(other)),
            },
        }
    }

    pub fn is_escaped(&self) -> bool {
        self.escaped.is_some()
    }
}
