/// The maximum allowed payload size of a single frame, set to 1 MiB.
///
/// A frame declaring a larger payload is rejected before any of it is buffered.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum allowed size of a fragmented message, set to 2 MiB.
///
/// Fragments are accumulated until this limit is crossed, at which point the partial message is
/// discarded and the read fails.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Configuration of a WebSocket session.
///
/// ```rust
/// use wsframe::Options;
///
/// let options = Options::default()
///     .with_max_payload_read(64 * 1024)
///     .with_max_message_size(256 * 1024)
///     .with_utf8();
/// ```
#[derive(Debug, Default, Clone)]
pub struct Options {
    /// Maximum payload size of a single frame. Defaults to [`MAX_PAYLOAD_READ`].
    pub max_payload_read: Option<usize>,
    /// Maximum total size of a fragmented message. Defaults to [`MAX_MESSAGE_SIZE`].
    pub max_message_size: Option<usize>,
    /// Whether text messages are validated as UTF-8.
    pub check_utf8: bool,
    /// Number of buffered outgoing bytes after which the write buffer is flushed.
    pub max_backpressure_write_boundary: Option<usize>,
}

impl Options {
    /// Sets the maximum payload size of a single frame.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum size of a message reassembled from several fragments.
    pub fn with_max_message_size(self, size: usize) -> Self {
        Self {
            max_message_size: Some(size),
            ..self
        }
    }

    /// Enables UTF-8 validation of text messages.
    ///
    /// An invalid text message makes the read fail with
    /// [`WebSocketError::InvalidUTF8`](crate::WebSocketError::InvalidUTF8).
    pub fn with_utf8(self) -> Self {
        Self {
            check_utf8: true,
            ..self
        }
    }

    /// Sets the write buffer size that triggers a flush while sending.
    pub fn with_backpressure_boundary(self, boundary: usize) -> Self {
        Self {
            max_backpressure_write_boundary: Some(boundary),
            ..self
        }
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    pub(crate) fn message_limit(&self) -> usize {
        self.max_message_size.unwrap_or(MAX_MESSAGE_SIZE)
    }
}
