//! Second phase of the merge: read, pad and write every variable payload.
//!
//! With one worker the caller's thread does everything sequentially. With
//! more, a fixed topology of one writer (the caller's thread, sole owner of
//! the output file) and `process_count - 1` readers is used; the output file
//! library is single-threaded for writes, so additional readers beyond that
//! provide no benefit. Readers drain granules from a shared input queue, pad
//! every schema variable and hand the staged buffer to the writer over a
//! channel. Buffer ownership transfers with the message; the writer drops
//! each buffer after its single indexed write.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use indicatif::ProgressBar;
use log::debug;

use crate::error::{ConciseError, Result};
use crate::paths::resolve_dim;
use crate::payload::{read_variable, resize_payload, synthesize, write_slab, StagedVariable};
use crate::schema::VariableInfo;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_SHARED_MEMORY_SIZE: u64 = 60_000_000;

/// Runs the variable merge, sequentially for a single worker or through the
/// reader/writer pipeline otherwise.
pub fn run_merge(
    dataset: &mut netcdf::FileMut,
    input_files: &[PathBuf],
    var_info: &BTreeMap<String, VariableInfo>,
    max_dims: &BTreeMap<String, usize>,
    process_count: usize,
) -> Result<()> {
    if process_count == 1 {
        run_single_core(dataset, input_files, var_info, max_dims)
    } else {
        run_multi_core(dataset, input_files, var_info, max_dims, process_count)
    }
}

fn run_single_core(
    dataset: &mut netcdf::FileMut,
    input_files: &[PathBuf],
    var_info: &BTreeMap<String, VariableInfo>,
    max_dims: &BTreeMap<String, usize>,
) -> Result<()> {
    let pbar = ProgressBar::new((input_files.len() * var_info.len()) as u64);

    for (i, file) in input_files.iter().enumerate() {
        let origin = netcdf::open(file)?;
        for (var_path, info) in var_info {
            let staged = stage_variable(&origin, i, var_path, info, max_dims)?;
            write_staged(dataset, &staged)?;
            pbar.inc(1);
        }
    }

    pbar.finish_and_clear();
    Ok(())
}

fn run_multi_core(
    dataset: &mut netcdf::FileMut,
    input_files: &[PathBuf],
    var_info: &BTreeMap<String, VariableInfo>,
    max_dims: &BTreeMap<String, usize>,
    process_count: usize,
) -> Result<()> {
    let total_variables = input_files.len() * var_info.len();
    debug!(
        "merging {} variables across {} read workers",
        total_variables,
        process_count - 1
    );

    let ledger = BufferLedger::new(staging_budget());
    let queue: Mutex<VecDeque<(usize, PathBuf)>> =
        Mutex::new(input_files.iter().cloned().enumerate().collect());
    let (tx, rx) = mpsc::channel::<StagedVariable>();

    thread::scope(|scope| {
        let mut readers = Vec::new();
        for _ in 0..process_count - 1 {
            let tx = tx.clone();
            let queue = &queue;
            let ledger = &ledger;
            readers.push(
                scope.spawn(move || read_worker(queue, tx, var_info, max_dims, ledger)),
            );
        }
        drop(tx);

        let result = write_loop(dataset, &rx, &mut readers, &ledger, total_variables);

        // Release any reader still blocked on the budget before joining
        ledger.abort();

        let mut first_error = result.err();
        for reader in readers {
            match reader.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(ConciseError::MergeFailed {
                            detail: String::from("a read worker panicked"),
                        });
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
}

fn write_loop(
    dataset: &mut netcdf::FileMut,
    rx: &mpsc::Receiver<StagedVariable>,
    readers: &mut Vec<thread::ScopedJoinHandle<Result<()>>>,
    ledger: &BufferLedger,
    total_variables: usize,
) -> Result<()> {
    let pbar = ProgressBar::new(total_variables as u64);
    let mut processed_variables = 0;

    while processed_variables < total_variables {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(staged) => {
                let nbytes = staged.nbytes();
                write_staged(dataset, &staged)?;
                drop(staged);
                ledger.release(nbytes);
                processed_variables += 1;
                pbar.inc(1);
            }
            Err(RecvTimeoutError::Timeout) => check_readers(readers)?,
            Err(RecvTimeoutError::Disconnected) => {
                check_readers(readers)?;
                return Err(ConciseError::MergeFailed {
                    detail: format!(
                        "read workers exited after {processed_variables} of {total_variables} variables"
                    ),
                });
            }
        }
    }

    pbar.finish_and_clear();
    Ok(())
}

/// Joins read workers that have already exited; a worker that errored or
/// panicked aborts the whole merge.
fn check_readers(readers: &mut Vec<thread::ScopedJoinHandle<Result<()>>>) -> Result<()> {
    let mut i = 0;
    while i < readers.len() {
        if readers[i].is_finished() {
            match readers.swap_remove(i).join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(ConciseError::MergeFailed {
                        detail: String::from("a read worker panicked"),
                    })
                }
            }
        } else {
            i += 1;
        }
    }
    Ok(())
}

fn read_worker(
    queue: &Mutex<VecDeque<(usize, PathBuf)>>,
    tx: Sender<StagedVariable>,
    var_info: &BTreeMap<String, VariableInfo>,
    max_dims: &BTreeMap<String, usize>,
    ledger: &BufferLedger,
) -> Result<()> {
    loop {
        let next = queue.lock().unwrap().pop_front();
        let Some((i, file)) = next else {
            return Ok(());
        };

        let origin = netcdf::open(&file)?;
        for (var_path, info) in var_info {
            let staged = stage_variable(&origin, i, var_path, info, max_dims)?;
            ledger.reserve(staged.nbytes())?;

            if tx.send(staged).is_err() {
                // The writer is gone; its error is the authoritative one
                return Ok(());
            }
        }
    }
}

/// Reads one variable from an origin granule and pads it to the aggregated
/// maximum shape. A variable the granule does not carry is synthesized
/// entirely from its fill value.
fn stage_variable(
    origin: &netcdf::File,
    subset_index: usize,
    var_path: &str,
    info: &VariableInfo,
    max_dims: &BTreeMap<String, usize>,
) -> Result<StagedVariable> {
    let root = origin.root().ok_or_else(|| ConciseError::InvalidInput {
        reason: format!("{:?} is not a NetCDF4 file", origin.path().unwrap_or_default()),
    })?;

    let target: Vec<usize> = info
        .dim_order()
        .iter()
        .map(|dim| resolve_dim(max_dims, info.group_path(), dim))
        .collect::<Result<_>>()?;

    let (data, shape) = match root.variable(&var_path[1..]) {
        None => synthesize(info, &target)?,
        Some(var) => {
            let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
            let data = read_variable(&var, &shape)?;
            resize_payload(data, &shape, &target, info.fill_value())?
        }
    };

    Ok(StagedVariable {
        subset_index,
        var_path: var_path.to_string(),
        shape,
        data,
    })
}

fn write_staged(dataset: &mut netcdf::FileMut, staged: &StagedVariable) -> Result<()> {
    let mut root = dataset
        .root_mut()
        .ok_or_else(|| ConciseError::InvariantViolation {
            detail: String::from("output file is not NetCDF4"),
        })?;
    let mut var =
        root.variable_mut(&staged.var_path[1..])
            .ok_or_else(|| ConciseError::InvariantViolation {
                detail: format!("unknown variable {} in output", staged.var_path),
            })?;
    write_slab(&mut var, staged.subset_index, &staged.shape, &staged.data)
}

struct LedgerState {
    outstanding: usize,
    aborted: bool,
}

/// Tracks the total bytes of staged buffers not yet written. Readers block
/// while their next buffer would push the total over the budget and staged
/// buffers are still outstanding; a single buffer larger than the whole
/// budget fails immediately rather than deadlocking.
struct BufferLedger {
    budget: usize,
    state: Mutex<LedgerState>,
    freed: Condvar,
}

impl BufferLedger {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            state: Mutex::new(LedgerState {
                outstanding: 0,
                aborted: false,
            }),
            freed: Condvar::new(),
        }
    }

    fn reserve(&self, nbytes: usize) -> Result<()> {
        if nbytes > self.budget {
            return Err(ConciseError::MemoryBudgetExceeded {
                needed: nbytes,
                budget: self.budget,
            });
        }

        let mut state = self.state.lock().unwrap();
        loop {
            if state.aborted {
                return Err(ConciseError::MergeFailed {
                    detail: String::from("merge aborted"),
                });
            }
            if state.outstanding == 0 || state.outstanding + nbytes <= self.budget {
                state.outstanding += nbytes;
                return Ok(());
            }
            state = self.freed.wait_timeout(state, POLL_INTERVAL).unwrap().0;
        }
    }

    fn release(&self, nbytes: usize) {
        let mut state = self.state.lock().unwrap();
        state.outstanding = state.outstanding.saturating_sub(nbytes);
        self.freed.notify_all();
    }

    fn abort(&self) {
        self.state.lock().unwrap().aborted = true;
        self.freed.notify_all();
    }
}

/// Staging budget: 95% of the shared-memory mount capacity.
fn staging_budget() -> usize {
    (shared_memory_size() as f64 * 0.95).round() as usize
}

fn shared_memory_size() -> u64 {
    match probe_shm_mount() {
        Some(total) => total,
        None => std::env::var("SHARED_MEMORY_SIZE")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_SHARED_MEMORY_SIZE),
    }
}

#[cfg(unix)]
fn probe_shm_mount() -> Option<u64> {
    let path = std::ffi::CString::new("/dev/shm").ok()?;
    let mut stat = std::mem::MaybeUninit::<libc::statvfs>::zeroed();
    let rc = unsafe { libc::statvfs(path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let stat = unsafe { stat.assume_init() };
    Some(stat.f_blocks as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn probe_shm_mount() -> Option<u64> {
    None
}
