use crate::error::Result;
use crate::frame::Frame;

/// Outcome of a single read from a frame source
#[derive(Debug)]
pub enum FrameRead {
    Frame(Frame),
    /// No frame arrived within the read timeout; the stream is still live
    Timeout,
    EndOfStream,
}

/// An opened, non-restartable stream of frames
///
/// Reads block the calling thread, so sources are only driven from the
/// session worker.
pub trait FrameSource: Send {
    /// Pull the next frame; fails with `ReadError` on I/O failure
    fn next_frame(&mut self) -> Result<FrameRead>;

    /// Release the underlying device. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Short name for logs
    fn describe(&self) -> String;
}

/// Opens a fresh `FrameSource` for every session
pub trait FrameSourceFactory: Send + Sync {
    /// Fails with `SourceUnavailable` when the stream cannot be opened
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}
