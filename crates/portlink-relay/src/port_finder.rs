//! Local TCP port allocation for tunnel listeners
//!
//! [`PortFinder`] prefers a deterministic port derived from seed data (for
//! example the identity of the tunnel target), so that the same target gets
//! the same local port across runs. Client applications that remember
//! connections by `host:port` then keep working. If the preferred port is
//! taken, it falls back to a bounded random search.
//!
//! The occupied-port snapshot is best effort: another process may grab the
//! returned port before the caller binds it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, TcpListener};
use thiserror::Error;
use tracing::debug;

use crate::config::PortFinderConfig;

const SEED_BITS: u32 = 15;
const SEED_MASK: u16 = (1 << SEED_BITS) - 1;

/// Errors from port allocation
#[derive(Debug, Error)]
pub enum PortFinderError {
    #[error("No free port in range {range_start}..{range_end} after {attempts} attempts")]
    Exhausted {
        range_start: u16,
        range_end: u16,
        attempts: usize,
    },

    #[error("Failed to query local TCP ports: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid port finder configuration: {0}")]
    InvalidConfig(String),
}

/// Source of the set of local TCP ports currently in use
pub trait PortTable: Send + Sync {
    /// Local ports of all listening sockets and open connections
    fn occupied_ports(&self) -> io::Result<HashSet<u16>>;
}

/// Port table backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortTable;

impl PortTable for SystemPortTable {
    #[cfg(target_os = "linux")]
    fn occupied_ports(&self) -> io::Result<HashSet<u16>> {
        let mut ports = HashSet::new();

        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            match std::fs::read_to_string(table) {
                Ok(contents) => ports.extend(parse_proc_net_tcp(&contents)),
                // tcp6 is missing when IPv6 is disabled
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        Ok(ports)
    }

    #[cfg(not(target_os = "linux"))]
    fn occupied_ports(&self) -> io::Result<HashSet<u16>> {
        debug!("No TCP table available on this platform, relying on bind failures");
        Ok(HashSet::new())
    }
}

/// Extract local ports from the contents of `/proc/net/tcp` or `/proc/net/tcp6`.
///
/// Every row counts, whatever its state: listeners and connections alike
/// occupy their local port.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_net_tcp(contents: &str) -> impl Iterator<Item = u16> + '_ {
    contents.lines().skip(1).filter_map(|line| {
        let local_address = line.split_whitespace().nth(1)?;
        let (_, port) = local_address.rsplit_once(':')?;
        u16::from_str_radix(port, 16).ok()
    })
}

/// Fold `data` into a 15-bit rolling checksum
fn fold_seed(mut checksum: u16, data: &[u8]) -> u16 {
    for &byte in data {
        checksum = ((checksum << 1) | (checksum >> (SEED_BITS - 1))) & SEED_MASK;
        checksum ^= byte as u16;
    }
    checksum
}

/// Finds unused local TCP ports
#[derive(Debug)]
pub struct PortFinder<T = SystemPortTable> {
    config: PortFinderConfig,
    seed: u16,
    rng: StdRng,
    ports: T,
}

impl PortFinder<SystemPortTable> {
    /// Port finder over the default range
    pub fn new() -> Self {
        Self {
            config: PortFinderConfig::default(),
            seed: 0,
            rng: StdRng::from_entropy(),
            ports: SystemPortTable,
        }
    }

    pub fn with_config(config: PortFinderConfig) -> Result<Self, PortFinderError> {
        Self::with_port_table(config, SystemPortTable)
    }
}

impl Default for PortFinder<SystemPortTable> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PortTable> PortFinder<T> {
    pub fn with_port_table(config: PortFinderConfig, ports: T) -> Result<Self, PortFinderError> {
        config.validate()?;

        Ok(Self {
            config,
            seed: 0,
            rng: StdRng::from_entropy(),
            ports,
        })
    }

    /// Use a fixed seed for the random fallback, for reproducible results
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Fold more data into the seed. Call before `find_port`.
    pub fn add_seed(&mut self, data: &[u8]) {
        self.seed = fold_seed(self.seed, data);
    }

    pub fn seed_checksum(&self) -> u16 {
        self.seed
    }

    /// The port derived from the seed.
    ///
    /// `None` when no seed has been added, or when the derived port falls
    /// outside the configured range.
    pub fn preferred_port(&self) -> Option<u16> {
        if self.seed == 0 {
            return None;
        }

        self.config
            .range_start
            .checked_add(self.seed)
            .filter(|port| *port < self.config.range_end)
    }

    /// Find an unused port.
    ///
    /// Returns the port and whether it is the preferred port derived from
    /// the seed.
    pub fn find_port(&mut self) -> Result<(u16, bool), PortFinderError> {
        let occupied: HashSet<u16> = self
            .ports
            .occupied_ports()?
            .into_iter()
            .filter(|port| (self.config.range_start..self.config.range_end).contains(port))
            .collect();

        if let Some(port) = self.preferred_port() {
            if !occupied.contains(&port) {
                debug!(port, "Using preferred port");
                return Ok((port, true));
            }
            debug!(port, "Preferred port is in use, searching for another");
        }

        let range = self.config.range_start..self.config.range_end;
        let rng = &mut self.rng;
        if let Some(port) = search_random(&occupied, self.config.max_attempts, || {
            rng.gen_range(range.clone())
        }) {
            debug!(port, "Using random port");
            return Ok((port, false));
        }

        Err(PortFinderError::Exhausted {
            range_start: self.config.range_start,
            range_end: self.config.range_end,
            attempts: self.config.max_attempts,
        })
    }
}

/// Draw up to `attempts` ports and return the first one not in `occupied`
fn search_random(
    occupied: &HashSet<u16>,
    attempts: usize,
    mut draw: impl FnMut() -> u16,
) -> Option<u16> {
    (0..attempts)
        .map(|_| draw())
        .find(|port| !occupied.contains(port))
}

/// Let the OS pick a free port on the loopback interface
pub fn find_free_local_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
