//! A ring of pending disk requests. Submitting never touches the hardware;
//! each `poll` dispatches the oldest request to the AHCI controller and
//! hands the outcome, together with the buffer, to the request's callback.
//! Dispatch is synchronous, so a poll lasts as long as the command does.

use alloc::boxed::Box;

use super::ahci::AhciController;
use super::error::StorageError;
use crate::log::TaggedLogger;
use crate::memory::dma::DmaRegion;

const LOGGER: TaggedLogger = TaggedLogger::new("IOSCHED");

pub const MAX_IO_REQUESTS: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

pub type IoCallback = Box<dyn FnOnce(Result<(), StorageError>, DmaRegion) + Send>;

struct IoRequest {
    port: usize,
    op: IoOp,
    lba: u64,
    count: u32,
    buffer: DmaRegion,
    callback: IoCallback,
}

pub struct IoScheduler {
    queue: [Option<IoRequest>; MAX_IO_REQUESTS],
    head: usize,
    tail: usize,
}

impl IoScheduler {
    pub fn new() -> Self {
        Self {
            queue: core::array::from_fn(|_| None),
            head: 0,
            tail: 0,
        }
    }

    /// Queue a request. One slot always stays empty to tell a full ring from
    /// an empty one, so at most `MAX_IO_REQUESTS - 1` requests wait at once.
    pub fn submit(
        &mut self,
        port: usize,
        op: IoOp,
        lba: u64,
        count: u32,
        buffer: DmaRegion,
        callback: IoCallback,
    ) -> Result<(), StorageError> {
        let next = (self.head + 1) % MAX_IO_REQUESTS;
        if next == self.tail {
            LOGGER.warn(format_args!("queue full, {:?} of lba {} rejected", op, lba));
            return Err(StorageError::QueueFull);
        }
        self.queue[self.head] = Some(IoRequest {
            port,
            op,
            lba,
            count,
            buffer,
            callback,
        });
        self.head = next;
        Ok(())
    }

    pub fn pending(&self) -> usize {
        (self.head + MAX_IO_REQUESTS - self.tail) % MAX_IO_REQUESTS
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Run the oldest request, if any. Returns whether one was dispatched.
    pub fn poll(&mut self, controller: &mut AhciController) -> bool {
        if self.is_empty() {
            return false;
        }
        let request = self.queue[self.tail].take();
        self.tail = (self.tail + 1) % MAX_IO_REQUESTS;

        let Some(mut request) = request else {
            return false;
        };
        let result = match request.op {
            IoOp::Read => controller.read_lba(
                request.port,
                request.lba,
                request.count,
                request.buffer.as_mut_slice(),
            ),
            IoOp::Write => controller.write_lba(
                request.port,
                request.lba,
                request.count,
                request.buffer.as_slice(),
            ),
        };
        if let Err(err) = result {
            LOGGER.debug(format_args!(
                "{:?} port {} lba {}: {} ({})",
                request.op,
                request.port,
                request.lba,
                err,
                err.status_code()
            ));
        }
        (request.callback)(result, request.buffer);
        true
    }
}

impl Default for IoScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use alloc::{boxed::Box, vec, vec::Vec};

    use super::{IoOp, IoScheduler, MAX_IO_REQUESTS};
    use crate::memory::address::PhysicalAddress;
    use crate::memory::dma::DmaRegion;
    use crate::storage::error::StorageError;

    #[test]
    fn ring_keeps_one_slot_free() {
        let mut backing: Vec<Vec<u8>> = (0..MAX_IO_REQUESTS).map(|_| vec![0u8; 512]).collect();
        let mut regions = backing.iter_mut().map(|block| unsafe {
            DmaRegion::from_raw_parts(block.as_mut_ptr(), PhysicalAddress::new(0x10_0000), 512)
                .unwrap()
        });

        let mut scheduler = IoScheduler::new();
        assert!(scheduler.is_empty());
        for lba in 0..(MAX_IO_REQUESTS - 1) as u64 {
            let region = regions.next().unwrap();
            scheduler
                .submit(0, IoOp::Read, lba, 1, region, Box::new(|_, _| ()))
                .unwrap();
        }
        assert_eq!(scheduler.pending(), MAX_IO_REQUESTS - 1);

        let region = regions.next().unwrap();
        assert_eq!(
            scheduler.submit(0, IoOp::Write, 99, 1, region, Box::new(|_, _| ())),
            Err(StorageError::QueueFull)
        );
    }
}
