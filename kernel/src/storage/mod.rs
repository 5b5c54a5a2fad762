//! Block storage: the AHCI and legacy ATA drivers, the registry their disks
//! are published in, the request queue in front of AHCI, and partition
//! table scanning.

pub mod ahci;
pub mod ata;
pub mod block;
pub mod error;
pub mod io_sched;
pub mod partition;
pub mod protocol;

use alloc::{boxed::Box, sync::Arc};

use self::ahci::hba::HbaRegisters;
use self::ahci::{find_controller, AhciController, AhciHandle};
use self::ata::AtaPio;
use self::block::BlockRegistry;
use crate::arch::port::PortIo;
use crate::config::KernelConfig;
use crate::log::TaggedLogger;
use crate::memory::address::PhysicalAddress;
use crate::memory::dma::DmaAllocator;
use crate::time::Clock;

const LOGGER: TaggedLogger = TaggedLogger::new("BLOCK");

/// What `init` brought up
pub struct Storage {
    pub registry: BlockRegistry,
    pub ahci: Option<AhciHandle>,
}

/// Start the disk drivers selected by `config` and register their disks.
/// With no `driver` lines, AHCI is tried first and ATA PIO only if AHCI
/// found nothing. `map_abar` turns the controller's physical register
/// address into an accessor.
pub fn init(
    config: &KernelConfig,
    io: Arc<dyn PortIo>,
    dma: Arc<dyn DmaAllocator>,
    clock: Arc<dyn Clock>,
    map_abar: impl FnOnce(PhysicalAddress) -> Option<Box<dyn HbaRegisters>>,
) -> Storage {
    let automatic = config.drivers.is_empty();
    let mut storage = Storage {
        registry: BlockRegistry::new(),
        ahci: None,
    };

    if automatic || config.wants_driver("ahci") {
        let hba = find_controller(&*io).and_then(|(_, abar)| map_abar(abar));
        if let Some(hba) = hba {
            let handle = AhciController::init(hba, dma, clock).into_handle();
            for disk in AhciController::block_devices(&handle) {
                if let Err(err) = storage.registry.register(Box::new(disk)) {
                    LOGGER.warn(format_args!("{}", err));
                }
            }
            storage.ahci = Some(handle);
        } else {
            LOGGER.log(format_args!("no AHCI controller"));
        }
    }

    if config.wants_driver("ata") || (automatic && storage.registry.is_empty()) {
        if let Some(drive) = AtaPio::init(io) {
            if let Err(err) = storage.registry.register(Box::new(drive)) {
                LOGGER.warn(format_args!("{}", err));
            }
        }
    }
    storage
}
