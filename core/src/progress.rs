/// Byte-level progress reporting for uploads and restores.
///
/// One reporter covers one aggregate total (a whole backup run or a whole
/// subtree restore), never a single piece.
pub trait ProgressReporter: Send + Sync {
    /// Announces the total number of bytes the operation expects to move.
    fn begin(&self, _total_bytes: u64) {}

    /// Reports `bytes` of plaintext transferred (or skipped as already
    /// restored).
    fn advance(&self, _bytes: u64) {}
}

/// Reporter that discards all updates.
pub struct NullProgress;

impl ProgressReporter for NullProgress {}
