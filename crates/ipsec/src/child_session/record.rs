//! Child SA records
//!
//! A [`ChildSaRecord`] is one negotiated Child SA pair: the SPIs, the derived
//! keys, the inbound and outbound kernel transforms, and the lifetime
//! scheduler that decides when it must be rekeyed or deleted.
//!
//! # Key Derivation
//!
//! Records are produced by a [`SaRecordFactory`]. The default
//! [`KeyDerivingFactory`] derives keys from the IKE SA's SK_d:
//!
//! ```text
//! KEYMAT = prf+(SK_d, [g^ir (new) |] Ni | Nr)
//! SK_ei | SK_ai | SK_er | SK_ar = KEYMAT
//! ```

use crate::config::SaLifetime;
use crate::crypto::prf::{ChildKeyMaterial, PrfAlgorithm};
use crate::ikev2::payload::{IkePayload, KePayload, PayloadListExt};
use crate::ikev2::proposal::{IntegTransformId, TransformType};
use crate::{Error, Result};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// Traffic direction of a kernel transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Peer to us
    Inbound,
    /// Us to peer
    Outbound,
}

/// Handle for the UDP encapsulation socket used for NAT traversal
///
/// Two handles are equal when they name the same socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncapSocket {
    id: u64,
    local_port: u16,
}

impl EncapSocket {
    /// Create a handle for socket `id` bound to `local_port`
    pub const fn new(id: u64, local_port: u16) -> Self {
        EncapSocket { id, local_port }
    }

    /// Socket identity
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bound local port
    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

/// Kernel IPsec transform for one direction of a Child SA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpsecTransform {
    /// SPI carried in ESP packets of this direction
    pub spi: u32,

    /// Direction
    pub direction: Direction,

    /// Outer source address
    pub source: IpAddr,

    /// Outer destination address
    pub destination: IpAddr,

    /// UDP encapsulation, if any
    pub encap: Option<EncapSocket>,
}

/// Moves kernel transforms to new outer addresses (kernel-assisted MOBIKE)
pub trait TransformMigrator: Send {
    /// Whether the platform can migrate transforms in place
    fn supports_migration(&self) -> bool;

    /// Migrate `transform` to the new outer address pair
    fn migrate_transform(
        &mut self,
        transform: &IpsecTransform,
        new_source: IpAddr,
        new_destination: IpAddr,
    ) -> Result<()>;
}

/// Platform without in-place transform migration
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKernelMigration;

impl TransformMigrator for NoKernelMigration {
    fn supports_migration(&self) -> bool {
        false
    }

    fn migrate_transform(&mut self, _: &IpsecTransform, _: IpAddr, _: IpAddr) -> Result<()> {
        Err(Error::InvalidState(
            "kernel transform migration unsupported".into(),
        ))
    }
}

/// Inputs for building a Child SA record
#[derive(Clone)]
pub struct SaRecordConfig {
    /// Our inbound SPI
    pub local_spi: u32,

    /// Peer's inbound SPI (our outbound)
    pub remote_spi: u32,

    /// Whether we initiated the exchange that created this SA
    pub local_init: bool,

    /// Our outer address
    pub local_address: IpAddr,

    /// Peer's outer address
    pub remote_address: IpAddr,

    /// UDP encapsulation socket
    pub encap_socket: Option<EncapSocket>,

    /// PRF of the IKE SA
    pub prf: PrfAlgorithm,

    /// D-H group negotiated for this exchange
    pub dh_group: Option<u16>,

    /// SK_d of the IKE SA
    pub sk_d: Zeroizing<Vec<u8>>,

    /// Transport mode
    pub is_transport: bool,

    /// Whether a separate integrity algorithm was negotiated
    pub has_integrity: bool,

    /// Lifetime of the new SA
    pub lifetime: SaLifetime,

    /// Creation time
    pub created_at: Instant,
}

impl SaRecordConfig {
    /// SPI chosen by the exchange initiator
    pub fn initiator_spi(&self) -> u32 {
        if self.local_init {
            self.local_spi
        } else {
            self.remote_spi
        }
    }

    /// SPI chosen by the exchange responder
    pub fn responder_spi(&self) -> u32 {
        if self.local_init {
            self.remote_spi
        } else {
            self.local_spi
        }
    }

    /// Outer address of the exchange initiator
    pub fn initiator_address(&self) -> IpAddr {
        if self.local_init {
            self.local_address
        } else {
            self.remote_address
        }
    }

    /// Outer address of the exchange responder
    pub fn responder_address(&self) -> IpAddr {
        if self.local_init {
            self.remote_address
        } else {
            self.local_address
        }
    }
}

impl std::fmt::Debug for SaRecordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaRecordConfig")
            .field("local_spi", &format_args!("0x{:08x}", self.local_spi))
            .field("remote_spi", &format_args!("0x{:08x}", self.remote_spi))
            .field("local_init", &self.local_init)
            .field("local_address", &self.local_address)
            .field("remote_address", &self.remote_address)
            .field("encap_socket", &self.encap_socket)
            .field("dh_group", &self.dh_group)
            .field("is_transport", &self.is_transport)
            .finish_non_exhaustive()
    }
}

/// Soft and hard lifetime deadlines of a record
///
/// Every reschedule bumps the generation so timers armed for an older
/// deadline can be recognized and dropped.
#[derive(Debug, Clone)]
pub struct RekeyScheduler {
    rekey_at: Instant,
    expire_at: Instant,
    generation: u64,
}

impl RekeyScheduler {
    /// Arm deadlines for a record created at `now`
    pub fn new(now: Instant, lifetime: SaLifetime) -> Self {
        RekeyScheduler {
            rekey_at: now + lifetime.soft_time,
            expire_at: now + lifetime.hard_time,
            generation: 0,
        }
    }

    /// Soft deadline
    pub fn rekey_at(&self) -> Instant {
        self.rekey_at
    }

    /// Hard deadline
    pub fn expire_at(&self) -> Instant {
        self.expire_at
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Move the soft deadline to `now + delay`, never past the hard deadline
    ///
    /// Returns the new generation.
    pub fn reschedule_rekey(&mut self, now: Instant, delay: Duration) -> u64 {
        self.rekey_at = (now + delay).min(self.expire_at);
        self.generation += 1;
        self.generation
    }
}

/// Negotiated Child SA pair
pub struct ChildSaRecord {
    local_spi: u32,
    remote_spi: u32,
    local_init: bool,
    inbound: IpsecTransform,
    outbound: IpsecTransform,
    keys: Option<ChildKeyMaterial>,
    scheduler: RekeyScheduler,
}

impl ChildSaRecord {
    /// Build a record from its config and derived keys
    pub fn new(config: &SaRecordConfig, keys: ChildKeyMaterial) -> Self {
        let inbound = IpsecTransform {
            spi: config.local_spi,
            direction: Direction::Inbound,
            source: config.remote_address,
            destination: config.local_address,
            encap: config.encap_socket,
        };
        let outbound = IpsecTransform {
            spi: config.remote_spi,
            direction: Direction::Outbound,
            source: config.local_address,
            destination: config.remote_address,
            encap: config.encap_socket,
        };

        ChildSaRecord {
            local_spi: config.local_spi,
            remote_spi: config.remote_spi,
            local_init: config.local_init,
            inbound,
            outbound,
            keys: Some(keys),
            scheduler: RekeyScheduler::new(config.created_at, config.lifetime),
        }
    }

    /// Our inbound SPI
    pub fn local_spi(&self) -> u32 {
        self.local_spi
    }

    /// Our outbound SPI
    pub fn remote_spi(&self) -> u32 {
        self.remote_spi
    }

    /// Whether we initiated the exchange that created this SA
    pub fn is_local_init(&self) -> bool {
        self.local_init
    }

    /// Inbound kernel transform
    pub fn inbound_transform(&self) -> &IpsecTransform {
        &self.inbound
    }

    /// Outbound kernel transform
    pub fn outbound_transform(&self) -> &IpsecTransform {
        &self.outbound
    }

    /// Kernel transform of a direction
    pub fn transform(&self, direction: Direction) -> &IpsecTransform {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    /// (encryption, integrity) keys protecting inbound traffic
    ///
    /// Empty after the record is closed.
    pub fn inbound_keys(&self) -> (&[u8], &[u8]) {
        match (&self.keys, self.local_init) {
            (Some(k), true) => (&k.sk_er, &k.sk_ar),
            (Some(k), false) => (&k.sk_ei, &k.sk_ai),
            (None, _) => (&[], &[]),
        }
    }

    /// (encryption, integrity) keys protecting outbound traffic
    pub fn outbound_keys(&self) -> (&[u8], &[u8]) {
        match (&self.keys, self.local_init) {
            (Some(k), true) => (&k.sk_ei, &k.sk_ai),
            (Some(k), false) => (&k.sk_er, &k.sk_ar),
            (None, _) => (&[], &[]),
        }
    }

    /// Lifetime scheduler
    pub fn scheduler(&self) -> &RekeyScheduler {
        &self.scheduler
    }

    /// Mutable lifetime scheduler
    pub fn scheduler_mut(&mut self) -> &mut RekeyScheduler {
        &mut self.scheduler
    }

    /// Point both transforms at a new outer address pair
    pub fn migrate(&mut self, new_local: IpAddr, new_remote: IpAddr) {
        self.inbound.source = new_remote;
        self.inbound.destination = new_local;
        self.outbound.source = new_local;
        self.outbound.destination = new_remote;
    }

    /// Wipe keys and release the kernel transforms
    pub fn close(&mut self) {
        // ChildKeyMaterial zeroizes on drop
        self.keys = None;
    }

    /// Whether `close` has run
    pub fn is_closed(&self) -> bool {
        self.keys.is_none()
    }
}

impl std::fmt::Debug for ChildSaRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSaRecord")
            .field("local_spi", &format_args!("0x{:08x}", self.local_spi))
            .field("remote_spi", &format_args!("0x{:08x}", self.remote_spi))
            .field("local_init", &self.local_init)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Diffie-Hellman seam for PFS during Child SA creation and rekey
pub trait KeyExchange: Send {
    /// Generate a key pair and return its public KE payload
    fn generate_public(&mut self, dh_group: u16) -> Result<KePayload>;

    /// Compute g^ir from our KE payload and the peer's
    fn shared_secret(&mut self, local: &KePayload, remote: &KePayload) -> Result<Vec<u8>>;
}

/// Key exchange that refuses every group
///
/// Suits deployments whose proposals carry no D-H transform.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKeyExchange;

impl KeyExchange for NoKeyExchange {
    fn generate_public(&mut self, dh_group: u16) -> Result<KePayload> {
        Err(Error::CryptoError(format!(
            "D-H group {} not supported",
            dh_group
        )))
    }

    fn shared_secret(&mut self, local: &KePayload, _remote: &KePayload) -> Result<Vec<u8>> {
        Err(Error::CryptoError(format!(
            "D-H group {} not supported",
            local.dh_group
        )))
    }
}

/// Builds Child SA records once negotiation completes
pub trait SaRecordFactory: Send {
    /// Derive a record from the exchanged payloads
    ///
    /// `local_payloads` are the payloads we sent and `remote_payloads` the
    /// ones the peer sent, regardless of who initiated.
    ///
    /// # Errors
    ///
    /// Returns `KeyDerivation` (or a crypto error) when keys cannot be derived.
    fn make_sa_record(
        &mut self,
        local_payloads: &[IkePayload],
        remote_payloads: &[IkePayload],
        config: SaRecordConfig,
    ) -> Result<ChildSaRecord>;

    /// Public KE payload for an outbound request or response
    fn key_exchange_payload(&mut self, dh_group: u16) -> Result<KePayload>;
}

/// Default factory deriving keys with prf+
#[derive(Debug, Default)]
pub struct KeyDerivingFactory<K> {
    key_exchange: K,
}

impl<K: KeyExchange> KeyDerivingFactory<K> {
    /// Create factory using `key_exchange` for PFS
    pub fn new(key_exchange: K) -> Self {
        KeyDerivingFactory { key_exchange }
    }
}

impl<K: KeyExchange> SaRecordFactory for KeyDerivingFactory<K> {
    fn make_sa_record(
        &mut self,
        local_payloads: &[IkePayload],
        remote_payloads: &[IkePayload],
        config: SaRecordConfig,
    ) -> Result<ChildSaRecord> {
        let (init_payloads, resp_payloads) = if config.local_init {
            (local_payloads, remote_payloads)
        } else {
            (remote_payloads, local_payloads)
        };

        let chosen = resp_payloads
            .sa()
            .ok_or_else(|| Error::KeyDerivation("no chosen proposal".into()))?
            .chosen_proposal()?;
        let encr_key_len = chosen
            .get_transform(TransformType::Encr)
            .and_then(|t| t.encr_key_len())
            .ok_or_else(|| Error::KeyDerivation("unsupported encryption transform".into()))?;
        let integ_key_len = chosen
            .get_transform(TransformType::Integ)
            .and_then(|t| IntegTransformId::from_u16(t.transform_id))
            .map(IntegTransformId::key_len)
            .unwrap_or(0);

        let nonce_i = init_payloads
            .nonce()
            .ok_or_else(|| Error::KeyDerivation("missing initiator nonce".into()))?;
        let nonce_r = resp_payloads
            .nonce()
            .ok_or_else(|| Error::KeyDerivation("missing responder nonce".into()))?;

        let shared_secret = match config.dh_group {
            Some(_) => {
                let local_ke = local_payloads
                    .ke()
                    .ok_or_else(|| Error::KeyDerivation("missing local KE".into()))?;
                let remote_ke = remote_payloads
                    .ke()
                    .ok_or_else(|| Error::KeyDerivation("missing remote KE".into()))?;
                Some(Zeroizing::new(
                    self.key_exchange.shared_secret(local_ke, remote_ke)?,
                ))
            }
            None => None,
        };

        let keys = ChildKeyMaterial::derive(
            config.prf,
            &config.sk_d,
            shared_secret.as_ref().map(|s| s.as_slice()),
            &nonce_i.nonce,
            &nonce_r.nonce,
            encr_key_len,
            integ_key_len,
        )
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;

        Ok(ChildSaRecord::new(&config, keys))
    }

    fn key_exchange_payload(&mut self, dh_group: u16) -> Result<KePayload> {
        self.key_exchange.generate_public(dh_group)
    }
}
