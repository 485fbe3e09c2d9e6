//! Collective communication façade over one component communicator.
//!
//! The engine needs exactly three collectives: `gatherv`, `scatterv`, and
//! `bcast`, always rooted at the I/O rank. Every rank must call the same
//! operation in the same order; a rank with nothing to contribute still
//! participates with a zero count. Payloads are raw byte slices; the
//! element tag selects the elemental transport type on backends where the
//! distinction matters (MPI).
//!
//! Backends: [`SelfComm`] for single-rank/serial runs, [`ThreadComm`] for
//! in-process multi-rank tests, and `MpiComm` (feature `mpi-support`) for
//! real distributed runs.

use crate::data::element::ElemType;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[cfg(feature = "mpi-support")]
pub mod mpi;
#[cfg(feature = "mpi-support")]
pub use mpi::MpiComm;

/// Blocking collective interface (minimal by design).
///
/// `counts` and `displs` are in elements, identical on every rank; byte
/// slices must cover `counts[rank] * elem.size_bytes()` bytes. Buffer-shape
/// violations are programming errors, not runtime conditions, and panic.
pub trait Communicator: Send + Sync {
    /// This process's rank within the communicator.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Gather per-rank slices onto `root`. `recv` is the rank-ordered
    /// concatenation buffer; only `root` supplies it.
    fn gatherv(
        &self,
        elem: ElemType,
        send: &[u8],
        recv: Option<&mut [u8]>,
        counts: &[usize],
        displs: &[usize],
        root: usize,
    );

    /// Scatter rank-ordered slices of `send` (supplied only on `root`) into
    /// each rank's `recv`.
    fn scatterv(
        &self,
        elem: ElemType,
        send: Option<&[u8]>,
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        root: usize,
    );

    /// Broadcast `buf` from `root` to all ranks.
    fn bcast(&self, elem: ElemType, buf: &mut [u8], root: usize);

    /// Broadcast a boolean from `root`; after the call every rank observes
    /// `root`'s value.
    fn bcast_flag(&self, flag: &mut bool, root: usize) {
        let mut b = [u8::from(*flag)];
        self.bcast(ElemType::Byte1, &mut b, root);
        *flag = b[0] == 1;
    }
}

/// Single-rank communicator for serial runs and unit tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn gatherv(
        &self,
        elem: ElemType,
        send: &[u8],
        recv: Option<&mut [u8]>,
        counts: &[usize],
        displs: &[usize],
        _root: usize,
    ) {
        let w = elem.size_bytes();
        let recv = recv.expect("root gatherv requires a receive buffer");
        let off = displs[0] * w;
        recv[off..off + counts[0] * w].copy_from_slice(send);
    }

    fn scatterv(
        &self,
        elem: ElemType,
        send: Option<&[u8]>,
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        _root: usize,
    ) {
        let w = elem.size_bytes();
        let send = send.expect("root scatterv requires a send buffer");
        let off = displs[0] * w;
        recv.copy_from_slice(&send[off..off + counts[0] * w]);
    }

    fn bcast(&self, _elem: ElemType, _buf: &mut [u8], _root: usize) {}
}

#[derive(Debug)]
struct Mailbox {
    /// (collective sequence number, rank) -> payload.
    slots: DashMap<(u64, usize), Bytes>,
    lock: Mutex<()>,
    cv: Condvar,
}

impl Mailbox {
    fn post(&self, key: (u64, usize), payload: Bytes) {
        self.slots.insert(key, payload);
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }

    fn take(&self, key: (u64, usize)) -> Bytes {
        loop {
            if let Some((_, payload)) = self.slots.remove(&key) {
                return payload;
            }
            let mut guard = self.lock.lock();
            if self.slots.contains_key(&key) {
                continue;
            }
            self.cv.wait_for(&mut guard, Duration::from_millis(1));
        }
    }
}

/// In-process multi-rank communicator: each rank is a thread sharing a
/// mailbox. Collectives are matched by a per-rank sequence counter, which
/// stays aligned because every rank issues the same collectives in the
/// same order.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    seq: Arc<AtomicU64>,
    mailbox: Arc<Mailbox>,
}

impl ThreadComm {
    /// Create one communicator handle per rank, all sharing a mailbox.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "communicator group needs at least one rank");
        let mailbox = Arc::new(Mailbox {
            slots: DashMap::new(),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                seq: Arc::new(AtomicU64::new(0)),
                mailbox: mailbox.clone(),
            })
            .collect()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn gatherv(
        &self,
        elem: ElemType,
        send: &[u8],
        recv: Option<&mut [u8]>,
        counts: &[usize],
        displs: &[usize],
        root: usize,
    ) {
        let w = elem.size_bytes();
        let seq = self.next_seq();
        debug_assert_eq!(send.len(), counts[self.rank] * w);
        if self.rank == root {
            let recv = recv.expect("root gatherv requires a receive buffer");
            for r in 0..self.size {
                let off = displs[r] * w;
                let dst = &mut recv[off..off + counts[r] * w];
                if r == root {
                    dst.copy_from_slice(send);
                } else {
                    let payload = self.mailbox.take((seq, r));
                    dst.copy_from_slice(&payload);
                }
            }
        } else {
            self.mailbox
                .post((seq, self.rank), Bytes::copy_from_slice(send));
        }
    }

    fn scatterv(
        &self,
        elem: ElemType,
        send: Option<&[u8]>,
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        root: usize,
    ) {
        let w = elem.size_bytes();
        let seq = self.next_seq();
        debug_assert_eq!(recv.len(), counts[self.rank] * w);
        if self.rank == root {
            let send = send.expect("root scatterv requires a send buffer");
            for r in 0..self.size {
                let off = displs[r] * w;
                let chunk = &send[off..off + counts[r] * w];
                if r == root {
                    recv.copy_from_slice(chunk);
                } else {
                    self.mailbox.post((seq, r), Bytes::copy_from_slice(chunk));
                }
            }
        } else {
            let payload = self.mailbox.take((seq, self.rank));
            recv.copy_from_slice(&payload);
        }
    }

    fn bcast(&self, _elem: ElemType, buf: &mut [u8], root: usize) {
        let seq = self.next_seq();
        if self.rank == root {
            for r in 0..self.size {
                if r != root {
                    self.mailbox.post((seq, r), Bytes::copy_from_slice(buf));
                }
            }
        } else {
            let payload = self.mailbox.take((seq, self.rank));
            buf.copy_from_slice(&payload);
        }
    }
}
