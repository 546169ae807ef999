//! Chunk planning: partition files into bounded-size archives.

use serde::{Deserialize, Serialize};

/// A file scheduled for upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    pub size: u64,
}

/// One archive worth of files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    /// 1-based position of this archive in the run.
    pub no: u32,
    pub files: Vec<PlannedFile>,
    /// Sum of the file sizes in this archive.
    pub bytes: u64,
}

impl ChunkPlan {
    fn new(no: u32) -> Self {
        Self {
            no,
            files: Vec::new(),
            bytes: 0,
        }
    }
}

/// Greedily pack `files`, in order, into archives of at most `max_chunk_bytes`.
///
/// A new archive is started when adding the next file would push the current,
/// non-empty archive over the budget. A single file larger than the budget is
/// never split: it lands alone in its own archive, which then exceeds the budget.
pub fn plan_chunks<I>(files: I, max_chunk_bytes: u64) -> Vec<ChunkPlan>
where
    I: IntoIterator<Item = PlannedFile>,
{
    let mut plans = Vec::new();
    let mut current = ChunkPlan::new(1);

    for file in files {
        if !current.files.is_empty() && current.bytes.saturating_add(file.size) > max_chunk_bytes {
            let next = ChunkPlan::new(current.no + 1);
            plans.push(std::mem::replace(&mut current, next));
        }
        current.bytes = current.bytes.saturating_add(file.size);
        current.files.push(file);
    }

    if !current.files.is_empty() {
        plans.push(current);
    }
    plans
}
