//! WAL-segment arithmetic shared between the catch-up driver and the file
//! replay engine: mapping an LSN to the WAL segment (and hence SQL file) that
//! hosts it. The naming rule mirrors Postgres's own `XLogFileName()` macro so
//! that file names agree exactly with the upstream producer.

use std::path::{Path, PathBuf};

use utils::lsn::Lsn;

/// Identifies a source history branch.
pub type TimeLineId = u32;

/// Sequential number of a fixed-size WAL segment since the start of time.
pub type XLogSegNo = u64;

/// Typical Postgres default; the real value is always read from the
/// producer's context file at startup (see `config::SourceContext`).
pub const DEFAULT_WAL_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

/// Segment number containing `lsn`, for a WAL segment size of `seg_sz` bytes.
/// `seg_sz` must be a power of two.
pub fn segment_number(lsn: Lsn, seg_sz: u64) -> XLogSegNo {
    lsn.segment_number(seg_sz)
}

/// LSN at which segment `segno` begins.
pub fn segment_start_lsn(segno: XLogSegNo, seg_sz: u64) -> Lsn {
    Lsn(segno * seg_sz)
}

/// 24-hex-digit WAL segment name for (timeline, segno, seg_sz): 8 hex digits
/// of timeline, followed by the segment number split into its "logical xlog
/// id" and in-id offset, Postgres-style.
pub fn wal_segment_name(timeline: TimeLineId, segno: XLogSegNo, seg_sz: u64) -> String {
    let segments_per_xlogid = 0x1_0000_0000u64 / seg_sz;
    format!(
        "{:08X}{:08X}{:08X}",
        timeline,
        segno / segments_per_xlogid,
        segno % segments_per_xlogid
    )
}

/// Path of the SQL file hosting `lsn`, under `dir`.
pub fn sql_file_path(dir: &Path, timeline: TimeLineId, lsn: Lsn, seg_sz: u64) -> PathBuf {
    let segno = segment_number(lsn, seg_sz);
    let name = wal_segment_name(timeline, segno, seg_sz);
    dir.join(format!("{name}.sql"))
}
