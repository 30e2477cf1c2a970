//! The exit-time leak report. Whatever is still in the registry when the
//! process goes down was never freed.

use crate::{
    alloc::record::AllocationRecord,
    config::Config,
    os::Platform,
    report::{emit, Frames, Record},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bucket {
    pub count: usize,
    pub bytes: usize,
}

impl Bucket {
    fn add(&mut self, size: usize) {
        self.count += 1;
        self.bytes = self.bytes.saturating_add(size);
    }
}

/// Leaks split by where they came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeakSummary {
    /// Allocated from user code paths
    pub confirmed: Bucket,
    /// Made by the loader or the runtime for itself: bootstrap allocations,
    /// the unwinder's, or stdio's buffers
    pub suspicious: Bucket,
}

impl LeakSummary {
    pub fn tally(leaks: &[AllocationRecord]) -> Self {
        let mut summary = Self::default();
        for record in leaks {
            if record.is_suspicious() {
                summary.suspicious.add(record.size());
            } else {
                summary.confirmed.add(record.size());
            }
        }
        summary
    }
}

/// Report `leaks`: a header and one record per confirmed leak if there are
/// any, then a summary no matter what
pub fn report<P>(platform: &P, config: &Config, leaks: &[AllocationRecord]) -> LeakSummary
where
    P: Platform,
{
    let summary = LeakSummary::tally(leaks);

    if summary.confirmed.count > 0 {
        emit(
            platform,
            &Record::Header {
                leaks_count: summary.confirmed.count,
                total_bytes: summary.confirmed.bytes,
            },
        );
        for record in leaks.iter().filter(|record| !record.is_suspicious()) {
            log::debug!(
                "{:#x}: {} bytes, allocated at {}s",
                record.address(),
                record.size(),
                record.created()
            );
            let frames = Frames::collect(platform, config.stack_mode, record.stack().frames());
            emit(
                platform,
                &Record::Leak {
                    addr: record.address(),
                    size: record.size(),
                    frames: frames.as_slice(),
                },
            );
        }
    }

    emit(
        platform,
        &Record::Summary {
            real_leaks: summary.confirmed.count,
            real_bytes: summary.confirmed.bytes,
            libc_leaks: summary.suspicious.count,
            libc_bytes: summary.suspicious.bytes,
        },
    );

    log::debug!(
        "{} confirmed leaks ({} bytes), {} suspicious ({} bytes)",
        summary.confirmed.count,
        summary.confirmed.bytes,
        summary.suspicious.count,
        summary.suspicious.bytes
    );
    summary
}
