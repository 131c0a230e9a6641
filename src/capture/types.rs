//! Common types used across the capture pipeline.

/// Which side of a connection captured bytes belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes the client sent towards the remote end.
    Request,
    /// Bytes the remote end sent back to the client.
    Response,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

/// Instruction consumed by a session worker, strictly in send order.
#[derive(Debug)]
pub enum CaptureCommand {
    Append { direction: Direction, data: Vec<u8> },
    Close,
}

/// Lifecycle of a capture session. Only `Accumulating` absorbs appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Accumulating,
    Flushing,
    Terminated,
}
