use snafu::Snafu;

/// Errors returned when the master or the daisy chain is used incorrectly.
///
/// Bus-level outcomes such as dropped frames or silent nodes are not errors;
/// they show up as state values.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// `send_data()`, `finish_message()` or a response session was started
    /// without a message in progress.
    #[snafu(display("No message in progress"))]
    NoMessageInProgress,
    /// Responses were requested for a message started without the response
    /// flag.
    #[snafu(display("Message doesn't ask for responses"))]
    NotAResponseMessage,
    /// A response session needs a non-zero per-node length.
    #[snafu(display("Response length is zero"))]
    ZeroResponseLength,
    /// The default response must have exactly one byte per response byte.
    #[snafu(display("Default response has {found} bytes, expected {expected}"))]
    DefaultsLengthMismatch { expected: usize, found: usize },
    /// The response buffer can't hold every node's response.
    #[snafu(display("Response buffer holds {found} bytes, {needed} needed"))]
    ResponseBufferTooSmall { needed: usize, found: usize },
    /// The prev and next daisy lines must be different lines.
    #[snafu(display("Invalid daisy chain polarity"))]
    InvalidPolarity,
}
