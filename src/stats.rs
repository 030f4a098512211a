//! Merged statistics and report formatting.

use crate::file::FileRecord;

/// A merged snapshot of all per-thread counters plus the engine gauges.
#[derive(Debug, Default, Clone)]
pub struct Statistics {
    /// Total tile requests.
    pub find_tile_calls: u64,
    /// Requests that missed the thread-local microcache.
    pub find_tile_microcache_misses: u64,
    /// Requests that also missed the main tile table (forcing a read).
    pub find_tile_cache_misses: u64,
    /// Total size of every image referenced, in bytes.
    pub files_totalsize: u64,
    /// Bytes actually read from disk.
    pub bytes_read: u64,
    /// Files that were not duplicates of an earlier file.
    pub unique_files: u64,
    /// Total file I/O time in seconds.
    pub fileio_time: f64,
    /// Portion of I/O time spent in opens.
    pub fileopen_time: f64,
    pub open_files_created: u64,
    pub open_files_current: usize,
    pub open_files_peak: usize,
    pub tiles_created: u64,
    pub tiles_current: usize,
    pub tiles_peak: usize,
    /// Resident tile bytes right now.
    pub cache_memory_used: usize,
    pub cache_memory_peak: usize,
}

/// Human-readable byte count: "512 B", "25.6 KB", "1.5 MB", "2.1 GB".
pub(crate) fn memformat(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    if bytes >= GB {
        format!("{:.1} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes / KB)
    } else {
        format!("{bytes:.0} B")
    }
}

/// Human-readable time interval: "0.05s", "12.3s", "2m 3.4s", "1h 2m 3.4s".
pub(crate) fn timeformat(seconds: f64) -> String {
    if seconds >= 3600.0 {
        let h = (seconds / 3600.0).floor();
        let m = ((seconds - h * 3600.0) / 60.0).floor();
        let s = seconds - h * 3600.0 - m * 60.0;
        format!("{h:.0}h {m:.0}m {s:.1}s")
    } else if seconds >= 60.0 {
        let m = (seconds / 60.0).floor();
        let s = seconds - m * 60.0;
        format!("{m:.0}m {s:.1}s")
    } else {
        format!("{seconds:.2}s")
    }
}

/// One line of the per-file statistics table.
///
/// `index` of `None` omits the leading ordinal; `include_stats` of false
/// omits the counters (used by the hot-spot lists, which print their own).
pub(crate) fn onefile_stat_line(
    index: Option<usize>,
    file: &FileRecord,
    include_stats: bool,
    automip: bool,
) -> String {
    let mut out = String::new();
    if let Some(i) = index {
        out.push_str(&format!("{i:7} "));
    }
    if include_stats {
        out.push_str(&format!(
            "{:4} {:7} {:8.1} {:>9}  ",
            file.times_opened(),
            file.tiles_read(),
            file.bytes_read() as f64 / (1024.0 * 1024.0),
            timeformat(file.io_time()),
        ));
    }
    if let Some(spec) = file.spec(0) {
        out.push_str(&format!(
            "{:4}x{:4}x{}.{}",
            spec.width,
            spec.height,
            spec.nchannels,
            spec.format.label(),
        ));
    }
    out.push_str("  ");
    out.push_str(file.filename());
    if let Some(canonical) = file.duplicate() {
        out.push_str(" DUPLICATES ");
        out.push_str(canonical.filename());
        return out;
    }
    if file.untiled() {
        out.push_str(" UNTILED");
    }
    if file.unmipped() && automip {
        out.push_str(" UNMIPPED");
    }
    if !file.unmipped() && !file.mip_used() {
        out.push_str(" MIP-UNUSED");
    }
    out
}

/// Header for the per-file table, aligned with [`onefile_stat_line`].
pub(crate) const FILE_TABLE_HEADER: &str =
    "        opens   tiles  MB read  I/O time  res             File";
