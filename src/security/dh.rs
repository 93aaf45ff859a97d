//! Finite-field Diffie-Hellman over an explicit group.
//!
//! The group is plain configuration: callers pass a `DhGroup` into the
//! engine, there is no shared table. Public values are big-endian and
//! left-padded to the byte length of the prime. Shared secrets use the
//! minimal big-endian encoding, which is what the device hashes for key
//! derivation.

use num_bigint::BigUint;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::SecurityError;

/// 1024-bit prime used by the reference BluFi clients.
const DEFAULT_PRIME: [u8; 128] = [
    0xcf, 0x5c, 0xf5, 0xc3, 0x84, 0x19, 0xa7, 0x24, 0x95, 0x7f, 0xf5, 0xdd,
    0x32, 0x3b, 0x9c, 0x45, 0xc3, 0xcd, 0xd2, 0x61, 0xeb, 0x74, 0x0f, 0x69,
    0xaa, 0x94, 0xb8, 0xbb, 0x1a, 0x5c, 0x96, 0x40, 0x91, 0x53, 0xbd, 0x76,
    0xb2, 0x42, 0x22, 0xd0, 0x32, 0x74, 0xe4, 0x72, 0x5a, 0x54, 0x06, 0x09,
    0x2e, 0x9e, 0x82, 0xe9, 0x13, 0x5c, 0x64, 0x3c, 0xae, 0x98, 0x13, 0x2b,
    0x0d, 0x95, 0xf7, 0xd6, 0x53, 0x47, 0xc6, 0x8a, 0xfc, 0x1e, 0x67, 0x7d,
    0xa9, 0x0e, 0x51, 0xbb, 0xab, 0x5f, 0x5c, 0xf4, 0x29, 0xc2, 0x91, 0xb4,
    0xba, 0x39, 0xc6, 0xb2, 0xdc, 0x5e, 0x8c, 0x72, 0x31, 0xe4, 0x6a, 0xa7,
    0x72, 0x8e, 0x87, 0x66, 0x45, 0x32, 0xcd, 0xf5, 0x47, 0xbe, 0x20, 0xc9,
    0xa3, 0xfa, 0x83, 0x42, 0xbe, 0x6e, 0x34, 0x37, 0x1a, 0x27, 0xc0, 0x6f,
    0x7d, 0xc0, 0xed, 0xdd, 0xd2, 0xf8, 0x63, 0x73,
];

const DEFAULT_GENERATOR: u32 = 2;

/// Prime and generator of a DH group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    prime: BigUint,
    generator: BigUint,
}

impl DhGroup {
    /// Build a group, rejecting primes too small to hold a key and
    /// generators outside `(1, p - 1)`.
    pub fn new(prime: BigUint, generator: BigUint) -> Result<Self, SecurityError> {
        let one = BigUint::from(1u32);
        if prime <= BigUint::from(3u32) || prime.bits() > 8 * u16::MAX as u64 {
            return Err(SecurityError::InvalidGroup);
        }
        if generator <= one || generator >= &prime - &one {
            return Err(SecurityError::InvalidGroup);
        }
        Ok(Self { prime, generator })
    }

    /// Parse hex-encoded parameters (no `0x` prefix, case-insensitive).
    pub fn from_hex(prime: &str, generator: &str) -> Result<Self, SecurityError> {
        let parse = |s: &str| {
            BigUint::parse_bytes(s.trim().as_bytes(), 16).ok_or(SecurityError::InvalidGroup)
        };
        Self::new(parse(prime)?, parse(generator)?)
    }

    /// Byte length of the prime; public keys are padded to it.
    pub fn key_len(&self) -> usize {
        self.prime.bits().div_ceil(8) as usize
    }

    pub fn prime_bytes(&self) -> Vec<u8> {
        self.prime.to_bytes_be()
    }

    pub fn generator_bytes(&self) -> Vec<u8> {
        self.generator.to_bytes_be()
    }

    /// Fresh ephemeral key pair from the thread RNG.
    pub fn generate_key_pair(&self) -> DhKeyPair {
        self.generate_key_pair_with(&mut rand::thread_rng())
    }

    /// Fresh ephemeral key pair; private exponent drawn from `[2, p - 2]`.
    pub fn generate_key_pair_with<R: RngCore + ?Sized>(&self, rng: &mut R) -> DhKeyPair {
        let mut raw = Zeroizing::new(vec![0u8; self.key_len() + 8]);
        rng.fill_bytes(&mut raw);

        let span = &self.prime - BigUint::from(3u32);
        let exponent = BigUint::from_bytes_be(&raw) % span + BigUint::from(2u32);
        self.key_pair(&exponent)
    }

    /// Key pair from a known private exponent, which must lie in `[2, p - 2]`.
    pub fn key_pair_from_private(&self, private: &[u8]) -> Result<DhKeyPair, SecurityError> {
        let exponent = BigUint::from_bytes_be(private);
        if exponent < BigUint::from(2u32) || exponent > &self.prime - BigUint::from(2u32) {
            return Err(SecurityError::InvalidPrivateKey);
        }
        Ok(self.key_pair(&exponent))
    }

    fn key_pair(&self, exponent: &BigUint) -> DhKeyPair {
        let public = self.generator.modpow(exponent, &self.prime);
        DhKeyPair {
            private: Zeroizing::new(exponent.to_bytes_be()),
            public: left_pad(&public.to_bytes_be(), self.key_len()),
        }
    }

    /// Check `1 < y < p - 1` and the encoded size of a peer public value.
    pub fn validate_public(&self, peer_public: &[u8]) -> Result<BigUint, SecurityError> {
        if peer_public.is_empty() || peer_public.len() > self.key_len() {
            return Err(SecurityError::InvalidPeerKey);
        }
        let one = BigUint::from(1u32);
        let y = BigUint::from_bytes_be(peer_public);
        if y <= one || y >= &self.prime - &one {
            return Err(SecurityError::InvalidPeerKey);
        }
        Ok(y)
    }
}

impl Default for DhGroup {
    fn default() -> Self {
        Self {
            prime: BigUint::from_bytes_be(&DEFAULT_PRIME),
            generator: BigUint::from(DEFAULT_GENERATOR),
        }
    }
}

/// Ephemeral key pair. The private exponent is wiped on drop.
pub struct DhKeyPair {
    private: Zeroizing<Vec<u8>>,
    public: Vec<u8>,
}

impl DhKeyPair {
    /// Public value, big-endian, padded to the prime length.
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// Derive the shared secret with the peer's public value.
    ///
    /// Leading zero bytes are stripped, so the secret can be shorter than
    /// the prime.
    pub fn compute_shared_secret(
        &self,
        group: &DhGroup,
        peer_public: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, SecurityError> {
        let y = group.validate_public(peer_public)?;
        let x = BigUint::from_bytes_be(&self.private);
        let secret = y.modpow(&x, &group.prime);
        Ok(Zeroizing::new(secret.to_bytes_be()))
    }
}

impl core::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("public_len", &self.public.len())
            .finish_non_exhaustive()
    }
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

// ── Tests ────────────────────────────────────────────────────
