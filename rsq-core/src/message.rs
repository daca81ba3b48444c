use crate::Value;

/// Severity of an application message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Warning,
    Error,
    Critical,
}

/// Lightweight notification posted through the application channel,
/// independent of the endpoint signal system.
#[derive(Clone, Debug)]
pub struct Message {
    pub kind: MessageKind,
    pub label: String,
    pub data: Value,
}
