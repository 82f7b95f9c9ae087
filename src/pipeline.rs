//! End-to-end pipeline: signer, index, matcher, and applier as
//! cooperating tasks
//!
//! Each stage runs on its own blocking task and streams records to the
//! next over a bounded channel, so the applier starts writing while the
//! matcher is still scanning. The lookup table is a pure fold and is
//! built inline in the matcher's task. One cancellation token is
//! observed by every stage; a cancelled or failed sync never touches
//! the destination, because the applier writes to a temp file and only
//! renames it over the destination on a clean stream end.

use crate::apply::{apply, ApplyStats};
use crate::config::SyncConfig;
use crate::delta::{LookupTable, Matcher};
use crate::error::{Error, Result};
use crate::signature::Signer;
use memmap2::Mmap;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Summary of one completed sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Blocks indexed from the receiver's stale copy
    pub blocks_indexed: u64,

    /// Operations applied
    pub operations: u64,

    /// Bytes that traveled as literals
    pub literal_bytes: u64,

    /// Bytes served from the receiver's stale copy
    pub copied_bytes: u64,
}

impl SyncStats {
    /// Total bytes in the reconstructed file
    pub fn bytes_written(&self) -> u64 {
        self.literal_bytes + self.copied_bytes
    }

    /// Fraction of the output served locally (0.0 to 1.0)
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.bytes_written();
        if total == 0 {
            0.0
        } else {
            self.copied_bytes as f64 / total as f64
        }
    }
}

// Blocking-iterator view of a channel, for stages running on blocking
// tasks.
struct RecvIter<T>(mpsc::Receiver<T>);

impl<T> Iterator for RecvIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.0.blocking_recv()
    }
}

/// Synchronize one file pair: rebuild `source`'s content at `dest`,
/// reusing blocks of the stale copy at `cache` where possible.
///
/// A missing cache file is not an error; the sync degenerates to a
/// plain full copy. On any failure or cancellation the destination is
/// left untouched.
pub async fn sync_files(
    source: &Path,
    cache: &Path,
    dest: &Path,
    config: &SyncConfig,
    cancel: CancellationToken,
) -> Result<SyncStats> {
    config.validate()?;

    tracing::info!(
        source = %source.display(),
        cache = %cache.display(),
        dest = %dest.display(),
        block_size = config.block_size,
        "starting sync"
    );

    let (sig_tx, sig_rx) = mpsc::channel(config.channel_capacity);
    let (op_tx, op_rx) = mpsc::channel(config.channel_capacity);

    // Receiver side, part one: stream the stale copy's signatures.
    let cache_file = match std::fs::File::open(cache) {
        Ok(file) => Some(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(cache = %cache.display(), "no stale copy, full transfer");
            None
        }
        Err(e) => return Err(Error::io("opening cache for signing", e)),
    };

    let signer_task = if let Some(file) = cache_file {
        let cfg = config.clone();
        let token = cancel.clone();
        Some(tokio::task::spawn_blocking(move || {
            let signer = Signer::new(file, &cfg).with_cancellation(token);
            for record in signer {
                if sig_tx.blocking_send(record).is_err() {
                    // Receiver hung up; nothing left to feed.
                    break;
                }
            }
        }))
    } else {
        // Close the channel so the table build sees an empty stream.
        drop(sig_tx);
        None
    };

    // Sender side: fold signatures into the lookup table, then scan the
    // authoritative file. All failures travel in-band on the operation
    // channel so the applier sees exactly one terminal error.
    let matcher_task = {
        let cfg = config.clone();
        let token = cancel.clone();
        let source_path = source.to_path_buf();
        tokio::task::spawn_blocking(move || -> u64 {
            let mut table = LookupTable::new();
            if let Err(err) = table.ingest(RecvIter(sig_rx), &token) {
                let _ = op_tx.blocking_send(Err(err));
                return table.block_count() as u64;
            }
            let blocks_indexed = table.block_count() as u64;

            let file = match std::fs::File::open(&source_path) {
                Ok(file) => file,
                Err(source) => {
                    let _ = op_tx.blocking_send(Err(Error::SourceRead { source }));
                    return blocks_indexed;
                }
            };

            let matcher = Matcher::new(file, table, &cfg).with_cancellation(token);
            for record in matcher {
                if op_tx.blocking_send(record).is_err() {
                    break;
                }
            }
            blocks_indexed
        })
    };

    // Receiver side, part two: reconstruct into a temp file and commit
    // only on a clean stream end.
    let applier_task = {
        let cfg = config.clone();
        let token = cancel.clone();
        let cache_path = cache.to_path_buf();
        let dest_path = dest.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<ApplyStats> {
            let mmap = map_cache(&cache_path)?;
            let cache_bytes: &[u8] = mmap.as_deref().unwrap_or(&[]);

            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::io("creating destination directory", e))?;
            }

            let temp_path = dest_path.with_extension("bsync_tmp");
            let mut temp_file = std::fs::File::create(&temp_path)
                .map_err(|e| Error::io("creating temp file", e))?;

            match apply(RecvIter(op_rx), cache_bytes, &mut temp_file, &cfg, &token) {
                Ok(stats) => {
                    temp_file
                        .sync_all()
                        .map_err(|e| Error::io("syncing temp file", e))?;
                    drop(temp_file);
                    std::fs::rename(&temp_path, &dest_path)
                        .map_err(|e| Error::io("renaming temp file to destination", e))?;
                    Ok(stats)
                }
                Err(err) => {
                    drop(temp_file);
                    let _ = std::fs::remove_file(&temp_path);
                    Err(err)
                }
            }
        })
    };

    if let Some(task) = signer_task {
        task.await.map_err(|_| Error::Stage { stage: "signer" })?;
    }
    let blocks_indexed = matcher_task
        .await
        .map_err(|_| Error::Stage { stage: "matcher" })?;
    let apply_stats = applier_task
        .await
        .map_err(|_| Error::Stage { stage: "applier" })??;

    let stats = SyncStats {
        blocks_indexed,
        operations: apply_stats.operations,
        literal_bytes: apply_stats.literal_bytes,
        copied_bytes: apply_stats.copied_bytes,
    };

    tracing::info!(
        operations = stats.operations,
        literal_bytes = stats.literal_bytes,
        copied_bytes = stats.copied_bytes,
        reuse = format!("{:.1}%", stats.reuse_ratio() * 100.0),
        "sync complete"
    );
    Ok(stats)
}

// Map the stale copy for random access. Missing and empty files both
// yield no mapping; copies against them fail in the applier, which is
// the correct outcome for a stream that references blocks the receiver
// never signed.
fn map_cache(path: &Path) -> Result<Option<Mmap>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io("opening cache for reconstruction", e)),
    };
    let len = file
        .metadata()
        .map_err(|e| Error::io("reading cache metadata", e))?
        .len();
    if len == 0 {
        return Ok(None);
    }
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io("mapping cache", e))?;
    Ok(Some(mmap))
}

/// Run the whole pipeline in memory: signatures from `cache`, match
/// search over `source`, reconstruction into a fresh buffer.
///
/// The streaming contract is the same as [`sync_files`]; this is the
/// single-threaded composition for callers that already hold both
/// sides as bytes.
pub fn sync_bytes(source: &[u8], cache: &[u8], config: &SyncConfig) -> Result<(Vec<u8>, SyncStats)> {
    config.validate()?;
    let cancel = CancellationToken::new();

    let mut table = LookupTable::new();
    table.ingest(
        Signer::new(std::io::Cursor::new(cache), config),
        &cancel,
    )?;
    let blocks_indexed = table.block_count() as u64;

    let matcher = Matcher::new(std::io::Cursor::new(source), table, config)
        .with_cancellation(cancel.clone());

    let mut out = Vec::with_capacity(source.len());
    let apply_stats = apply(matcher, cache, &mut out, config, &cancel)?;

    Ok((
        out,
        SyncStats {
            blocks_indexed,
            operations: apply_stats.operations,
            literal_bytes: apply_stats.literal_bytes,
            copied_bytes: apply_stats.copied_bytes,
        },
    ))
}
