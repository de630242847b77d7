//! Local SPI allocation
//!
//! Inbound ESP SPIs are chosen by the receiver. Values 1..=255 are reserved
//! by IANA and 0 is never valid (RFC 4303 Section 2.1).

use crate::{Error, Result};
use rand::Rng;
use std::collections::HashSet;
use std::net::IpAddr;

/// Lowest SPI value available for allocation
pub const MIN_SPI: u32 = 256;

/// Attempts before the random allocator reports exhaustion
const MAX_ALLOCATION_ATTEMPTS: usize = 64;

/// Reserves locally unique inbound SPIs
pub trait SpiAllocator: Send {
    /// Reserve an SPI for traffic addressed to `local_address`
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` when no SPI can be reserved.
    fn allocate_spi(&mut self, local_address: IpAddr) -> Result<u32>;

    /// Return an SPI to the pool
    ///
    /// Releasing an unknown SPI is a no-op.
    fn release_spi(&mut self, spi: u32);
}

/// Allocator drawing random SPIs from the unreserved range
#[derive(Debug, Default)]
pub struct RandomSpiAllocator {
    in_use: HashSet<(IpAddr, u32)>,
}

impl RandomSpiAllocator {
    /// Create an empty allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of SPIs currently reserved
    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}

impl SpiAllocator for RandomSpiAllocator {
    fn allocate_spi(&mut self, local_address: IpAddr) -> Result<u32> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let spi = rng.gen_range(MIN_SPI..=u32::MAX);
            if self.in_use.insert((local_address, spi)) {
                return Ok(spi);
            }
        }
        Err(Error::ResourceUnavailable(format!(
            "no free SPI for {}",
            local_address
        )))
    }

    fn release_spi(&mut self, spi: u32) {
        self.in_use.retain(|(_, s)| *s != spi);
    }
}
