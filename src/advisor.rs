use std::num::NonZeroU64;

/// Split size used when no partition count is requested (HDFS block size)
pub const DEFAULT_BLOCK_SIZE: u64 = 128 * 1024 * 1024;

/// Target split size for `desired` partitions, by plain integer division
pub fn advise(total_bytes: u64, desired: NonZeroU64) -> u64 {
    total_bytes / desired.get()
}

/// Lower and upper bound handed to the splitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSizeHint {
    pub min: u64,
    pub max: u64,
}

impl SplitSizeHint {
    /// Pin both bounds to the advised size so the splitter aims for `desired` splits
    pub fn for_partitions(total_bytes: u64, desired: NonZeroU64) -> Self {
        let size = advise(total_bytes, desired);
        SplitSizeHint { min: size, max: size }
    }
}

/// Split size the splitter actually uses: `max(min, min(max, block))`, at least 1 byte
pub fn effective_split_size(hint: Option<SplitSizeHint>, block_size: u64) -> u64 {
    let size = match hint {
        Some(hint) => hint.min.max(hint.max.min(block_size)),
        None => block_size,
    };
    size.max(1)
}
