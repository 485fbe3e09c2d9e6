//! MPI backend (feature = "mpi-support").
//!
//! Maps the byte-width tag onto the matching elemental MPI datatype and
//! delegates to the standard varcount collectives.

use super::Communicator;
use crate::data::element::{ElemType, Element};
use mpi::Count;
use mpi::datatype::{Equivalence, Partition, PartitionMut};
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator as _, Root};

/// World communicator handle; owns the MPI environment for the process
/// lifetime.
pub struct MpiComm {
    _universe: Universe,
    world: SimpleCommunicator,
}

impl MpiComm {
    /// Initialize MPI and wrap the world communicator. Returns `None` if
    /// MPI was already initialized.
    pub fn new() -> Option<Self> {
        let universe = mpi::initialize()?;
        let world = universe.world();
        Some(MpiComm {
            _universe: universe,
            world,
        })
    }

    fn counts_as_mpi(counts: &[usize]) -> Vec<Count> {
        counts.iter().map(|&c| c as Count).collect()
    }

    fn gatherv_typed<T: Element + Equivalence>(
        &self,
        send: &[u8],
        recv: Option<&mut [u8]>,
        counts: &[usize],
        displs: &[usize],
        root: usize,
    ) {
        let send_t: &[T] = bytemuck::cast_slice(send);
        let root_proc = self.world.process_at_rank(root as Count);
        if self.rank() == root {
            let recv = recv.expect("root gatherv requires a receive buffer");
            let recv_t: &mut [T] = bytemuck::cast_slice_mut(recv);
            let counts = Self::counts_as_mpi(counts);
            let displs = Self::counts_as_mpi(displs);
            let mut partition = PartitionMut::new(recv_t, &counts[..], &displs[..]);
            root_proc.gather_varcount_into_root(send_t, &mut partition);
        } else {
            root_proc.gather_varcount_into(send_t);
        }
    }

    fn scatterv_typed<T: Element + Equivalence>(
        &self,
        send: Option<&[u8]>,
        recv: &mut [u8],
        counts: &[usize],
        displs: &[usize],
        root: usize,
    ) {
        let recv_t: &mut [T] = bytemuck::cast_slice_mut(recv);
        let root_proc = self.world.process_at_rank(root as Count);
        if self.rank() == root {
            let send = send.expect("root scatterv requires a send buffer");
            let send_t: &[T] = bytemuck::cast_slice(send);
            let counts = Self::counts_as_mpi(counts);
            let displs = Self::counts_as_mpi(displs);
            let partition = Partition::new(send_t, &counts[..], &displs[..]);
            root_proc.scatter_varcount_into_root(&partition, recv_t);
        } else {
            root_proc.scatter_varcount_into(recv_t);
        }
    }

    fn bcast_typed<T: Element + Equivalence>(&self, buf: &mut [u8], root: usize) {
        let buf_t: &mut [T] = bytemuck::cast_slice_mut(buf);
        self.world
            .process_at_rank(root as Count)
            .broadcast_into(buf_t);
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
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
        match elem {
            ElemType::Byte1 => self.gatherv_typed::<u8>(send, recv, counts, displs, root),
            ElemType::Byte2 => self.gatherv_typed::<u16>(send, recv, counts, displs, root),
            ElemType::Byte4 => self.gatherv_typed::<u32>(send, recv, counts, displs, root),
            ElemType::Byte8 => self.gatherv_typed::<u64>(send, recv, counts, displs, root),
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
        match elem {
            ElemType::Byte1 => self.scatterv_typed::<u8>(send, recv, counts, displs, root),
            ElemType::Byte2 => self.scatterv_typed::<u16>(send, recv, counts, displs, root),
            ElemType::Byte4 => self.scatterv_typed::<u32>(send, recv, counts, displs, root),
            ElemType::Byte8 => self.scatterv_typed::<u64>(send, recv, counts, displs, root),
        }
    }

    fn bcast(&self, elem: ElemType, buf: &mut [u8], root: usize) {
        match elem {
            ElemType::Byte1 => self.bcast_typed::<u8>(buf, root),
            ElemType::Byte2 => self.bcast_typed::<u16>(buf, root),
            ElemType::Byte4 => self.bcast_typed::<u32>(buf, root),
            ElemType::Byte8 => self.bcast_typed::<u64>(buf, root),
        }
    }
}
