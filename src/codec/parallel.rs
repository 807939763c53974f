//! Multithreaded encode pipeline.
//!
//! One reader thread batches input lines, `T` workers each run their own
//! encoder over whole batches, and a sink drains results in submission order
//! so output lines keep their input order. Batches are aligned to the
//! checkpoint period: every checkpoint resets the remembered row, so a batch
//! beginning at a checkpoint encodes independently, and the assembled output
//! is byte-identical to a single-threaded run whenever batch boundaries land
//! on checkpoints. Bounded channels give the pipeline back-pressure: at most
//! one batch queues per worker.

use std::io::{BufRead, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;

use super::encoder::{Encoder, EncoderOptions};
use super::stats::TranscodeStats;
use super::Transcoder;

/// Batch size when periodic checkpoints are disabled.
const DEFAULT_BATCH_LINES: u64 = 1000;

struct Batch {
    /// 1-based input line number of the first line in the batch.
    first_line: u64,
    lines: Vec<Vec<u8>>,
}

type BatchResult = std::result::Result<(Vec<u8>, TranscodeStats), anyhow::Error>;

/// Encode `input` to `output` using `threads` worker threads.
pub fn encode_parallel<R, W>(
    mut input: R,
    output: W,
    options: EncoderOptions,
    threads: usize,
) -> Result<TranscodeStats>
where
    R: BufRead,
    W: Write + Send,
{
    debug_assert!(threads >= 2);
    let batch_lines = if options.period > 0 {
        options.period
    } else {
        DEFAULT_BATCH_LINES
    };

    thread::scope(|scope| -> Result<TranscodeStats> {
        let mut job_txs: Vec<SyncSender<Batch>> = Vec::with_capacity(threads);
        let mut result_rxs: Vec<Receiver<BatchResult>> = Vec::with_capacity(threads);
        for _ in 0..threads {
            let (job_tx, job_rx) = sync_channel::<Batch>(1);
            let (result_tx, result_rx) = sync_channel::<BatchResult>(1);
            scope.spawn(move || encode_batches(job_rx, result_tx, options));
            job_txs.push(job_tx);
            result_rxs.push(result_rx);
        }

        // Sink: consume batch results in the round-robin order the reader
        // submits them, so output order matches input order.
        let sink = scope.spawn(move || -> Result<TranscodeStats> {
            let mut output = output;
            let mut total = TranscodeStats::default();
            let mut failure: Option<anyhow::Error> = None;
            'drain: loop {
                for result_rx in &result_rxs {
                    match result_rx.recv() {
                        Ok(Ok((bytes, stats))) => {
                            // After a failure, keep draining so the reader
                            // and workers are never left blocked on a full
                            // channel.
                            if failure.is_none() {
                                if let Err(e) = output.write_all(&bytes) {
                                    failure = Some(
                                        anyhow::Error::from(e).context("writing output"),
                                    );
                                }
                                total += stats;
                            }
                        }
                        Ok(Err(e)) => {
                            if failure.is_none() {
                                failure = Some(e);
                            }
                        }
                        Err(_) => break 'drain,
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }
            output.flush().context("flushing output")?;
            Ok(total)
        });

        // Reader: accumulate batches of at least `batch_lines` data lines;
        // header lines belong to the first batch.
        let mut line = Vec::new();
        let mut batch = Vec::new();
        let mut batch_first_line = 1u64;
        let mut data_lines = 0u64;
        let mut line_number = 0u64;
        let mut next_worker = 0usize;
        loop {
            line.clear();
            let n = input.read_until(b'\n', &mut line).context("reading input")?;
            if n == 0 {
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            line_number += 1;
            if line_number == 1 && !line.starts_with(b"##fileformat=") {
                warn!("input does not begin with a ##fileformat= line; proceeding anyway");
            }
            if !line.is_empty() && line[0] != b'#' {
                data_lines += 1;
            }
            batch.push(line.clone());
            if data_lines >= batch_lines {
                submit(
                    &job_txs[next_worker % threads],
                    Batch {
                        first_line: batch_first_line,
                        lines: std::mem::take(&mut batch),
                    },
                )?;
                next_worker += 1;
                batch_first_line = line_number + 1;
                data_lines = 0;
            }
        }
        if !batch.is_empty() {
            submit(
                &job_txs[next_worker % threads],
                Batch {
                    first_line: batch_first_line,
                    lines: batch,
                },
            )?;
        }
        drop(job_txs);

        match sink.join() {
            Ok(result) => result,
            Err(_) => bail!("output thread panicked"),
        }
    })
}

fn submit(job_tx: &SyncSender<Batch>, batch: Batch) -> Result<()> {
    job_tx
        .send(batch)
        .map_err(|_| anyhow!("encoder worker terminated unexpectedly"))
}

/// Worker loop: one fresh encoder per batch. A batch starts at a checkpoint
/// boundary, so the encoder needs no state from earlier batches beyond its
/// line-number offset for error messages.
fn encode_batches(
    job_rx: Receiver<Batch>,
    result_tx: SyncSender<BatchResult>,
    options: EncoderOptions,
) {
    for batch in job_rx {
        let mut encoder = Encoder::new(options);
        encoder.set_line_offset(batch.first_line - 1);
        let mut bytes = Vec::new();
        let mut outcome = Ok(());
        for line in &batch.lines {
            match encoder.process_line(line) {
                Ok(encoded) => {
                    bytes.extend_from_slice(encoded);
                    bytes.push(b'\n');
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        let result = outcome.map(|()| (bytes, encoder.stats()));
        if result_tx.send(result).is_err() {
            break;
        }
    }
}
