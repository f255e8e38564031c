use std::fs::File;
use std::path::Path;
use std::sync::mpsc::sync_channel;
use std::sync::Mutex;

use memmap2::MmapOptions;

use crate::error::{CounterError, Result};
use crate::estimator::Estimator;
use crate::hash::fnv1a_32;
use crate::ipv4::parse_ipv4;

/// Window size the file is mapped in, chosen as a multiple of 4 KiB so the
/// mapping stays page-aligned. The last window of a file is shorter.
const WINDOW_SIZE: u64 = 1 << 30;

/// Number of 32-bit values accumulated before a batch is flushed to the
/// shared estimator. Amortizes the mutex acquisition to roughly once per
/// 200 lines.
const BATCH_CAPACITY: usize = 200;

/// Drives a single estimator over a file of newline-delimited IPv4
/// literals: memory-mapped window by window, line-aligned partition by
/// partition, one worker per partition.
pub struct Pipeline {
    parallel: bool,
    hash: bool,
}

impl Pipeline {
    /// `hash` selects whether each parsed value is re-hashed (FNV-1a)
    /// before being added — on for the HLL-family estimators, which need a
    /// near-uniform 32-bit input, off for the exact bitmap and set
    /// estimators, which want the raw IPv4 integer as an index/key.
    pub fn new(parallel: bool, hash: bool) -> Self {
        Self { parallel, hash }
    }

    /// Counts distinct addresses in `path` into `estimator` and returns
    /// `estimator.count()`.
    ///
    /// With `parallel` off, the whole pipeline runs on the calling thread
    /// and `estimator` is never shared; callers must not hand it to other
    /// threads concurrently in that mode, since no synchronization is
    /// taken around it.
    pub fn count_file(&self, path: &Path, estimator: &mut dyn Estimator) -> Result<u64> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len == 0 {
            return Err(CounterError::InvalidFileSize(0));
        }

        log::debug!("{} bytes to ingest from {}", file_len, path.display());

        let mut offset = 0u64;
        while offset < file_len {
            let window_len = std::cmp::min(WINDOW_SIZE, file_len - offset);
            log::debug!("mapping window at offset {offset}, {window_len} bytes");
            self.process_window(&file, offset, window_len, estimator)?;
            offset += window_len;
        }

        let count = estimator.count();
        log::info!("ingested {file_len} bytes, cardinality estimate {count}");
        Ok(count)
    }

    fn process_window(
        &self,
        file: &File,
        offset: u64,
        len: u64,
        estimator: &mut dyn Estimator,
    ) -> Result<()> {
        let mmap = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(len as usize)
                .map(file)?
        };

        if self.parallel {
            self.process_parallel(offset, &mmap, estimator)
        } else {
            crate::fault::guarded(offset, || {
                Self::process_partition(&mmap, self.hash, estimator);
                Ok(())
            })
        }
    }

    /// Partitions `data` and fans one worker out per partition. Each
    /// worker arms its own page-fault recovery point: a SIGBUS or
    /// SIGSEGV is delivered to whichever thread touches the faulting
    /// page, so the recovery point has to live on that same thread,
    /// not on the coordinator.
    fn process_parallel(
        &self,
        window_offset: u64,
        data: &[u8],
        estimator: &mut dyn Estimator,
    ) -> Result<()> {
        let ranges = partition_ranges(data, num_cpus::get());
        log::debug!("partitioned window into {} line-aligned chunks", ranges.len());
        let estimator = Mutex::new(estimator);
        let (tx, rx) = sync_channel::<CounterError>(ranges.len());
        let hash = self.hash;

        std::thread::scope(|scope| {
            for (start, end) in &ranges {
                let chunk = &data[*start..*end];
                let estimator = &estimator;
                let tx = tx.clone();
                scope.spawn(move || {
                    let outcome = crate::fault::guarded(window_offset, || {
                        Self::process_partition_locked(chunk, hash, estimator)
                    });
                    if let Err(err) = outcome {
                        let _ = tx.send(err);
                    }
                });
            }
        });
        drop(tx);

        match rx.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }

    /// Processes one partition sequentially, flushing full and partial
    /// batches straight into `estimator` without any locking. Used for the
    /// single-partition, non-parallel path.
    fn process_partition(data: &[u8], hash: bool, estimator: &mut dyn Estimator) {
        let mut batch: Vec<u32> = Vec::with_capacity(BATCH_CAPACITY);
        for ip in iter_lines(data).map(parse_ipv4) {
            batch.push(ip);
            if batch.len() == BATCH_CAPACITY {
                flush_into(&mut batch, hash, estimator);
            }
        }
        if !batch.is_empty() {
            flush_into(&mut batch, hash, estimator);
        }
    }

    /// Same as [`Self::process_partition`] but for a worker sharing the
    /// estimator with siblings: the mutex is taken for the whole batch and
    /// released after, never per line.
    fn process_partition_locked(
        data: &[u8],
        hash: bool,
        estimator: &Mutex<&mut dyn Estimator>,
    ) -> Result<()> {
        let mut batch: Vec<u32> = Vec::with_capacity(BATCH_CAPACITY);
        for ip in iter_lines(data).map(parse_ipv4) {
            batch.push(ip);
            if batch.len() == BATCH_CAPACITY {
                flush_locked(&mut batch, hash, estimator);
            }
        }
        if !batch.is_empty() {
            flush_locked(&mut batch, hash, estimator);
        }
        Ok(())
    }
}

/// Iterates the `\n`-delimited records of a partition, including a final
/// record with no trailing newline.
fn iter_lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = data;
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        match rest.iter().position(|&b| b == b'\n') {
            Some(end) => {
                let line = &rest[..end];
                rest = &rest[end + 1..];
                Some(line)
            }
            None => {
                done = true;
                if rest.is_empty() {
                    None
                } else {
                    Some(rest)
                }
            }
        }
    })
}

fn flush_into(batch: &mut Vec<u32>, hash: bool, estimator: &mut dyn Estimator) {
    for &ip in batch.iter() {
        estimator.add(if hash { fnv1a_32(ip) } else { ip });
    }
    batch.clear();
}

fn flush_locked(batch: &mut Vec<u32>, hash: bool, estimator: &Mutex<&mut dyn Estimator>) {
    let mut guard = estimator.lock().expect("estimator mutex poisoned");
    flush_into(batch, hash, &mut **guard);
}

/// Splits `data` into `n` (or fewer) line-aligned partitions. Each cut is
/// the byte immediately after a newline, so no partition ever splits a
/// line; the last partition always runs to the end of `data`.
fn partition_ranges(data: &[u8], n: usize) -> Vec<(usize, usize)> {
    let len = data.len();
    let stride = if n == 0 || n > len { len } else { len / n };

    if stride == 0 {
        return vec![(0, len)];
    }

    let mut cuts = Vec::new();
    let mut cursor = 0usize;
    loop {
        cursor += stride;
        if cursor >= len {
            cuts.push(len);
            break;
        }
        match data[cursor..].iter().position(|&b| b == b'\n') {
            Some(pos) => {
                cursor += pos + 1;
                cuts.push(cursor);
            }
            None => {
                cuts.push(len);
                break;
            }
        }
    }

    let mut ranges = Vec::with_capacity(cuts.len());
    let mut start = 0;
    for end in cuts {
        ranges.push((start, end));
        start = end;
    }
    ranges
}
