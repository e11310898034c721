use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;

use super::dh_groups::{FfcGroup, GROUP_2048, GROUP_3072, GROUP_4096};
use super::PkId;
use crate::error::{Error, ProtocolError, Result};

fn ffc_group(id: PkId) -> Option<&'static FfcGroup> {
    match id {
        PkId::Dh2k => Some(&GROUP_2048),
        PkId::Dh3k => Some(&GROUP_3072),
        PkId::Dh4k => Some(&GROUP_4096),
        _ => None,
    }
}

/// One endpoint's half of a Diffie-Hellman exchange. Created when the
/// stream starts negotiating, dropped at Secure entry.
pub enum DhExchange {
    Ffc {
        group: &'static FfcGroup,
        sv: BigUint,
        pv: Vec<u8>,
    },
    P256 {
        secret: p256::ecdh::EphemeralSecret,
        pv: Vec<u8>,
    },
    P384 {
        secret: p384::ecdh::EphemeralSecret,
        pv: Vec<u8>,
    },
    P521 {
        secret: p521::ecdh::EphemeralSecret,
        pv: Vec<u8>,
    },
}

/// Big-endian bytes left-padded to the group's public value width.
fn to_fixed_be(v: &BigUint, len: usize) -> Vec<u8> {
    let raw = v.to_bytes_be();
    let mut out = vec![0u8; len];
    let off = len - raw.len();
    out[off..].copy_from_slice(&raw);
    out
}

/// X || Y coordinates without the SEC1 point prefix, as carried in DHPart.
fn strip_sec1_prefix(point_bytes: &[u8]) -> Vec<u8> {
    point_bytes[1..].to_vec()
}

fn with_sec1_prefix(pv: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pv.len() + 1);
    out.push(0x04);
    out.extend_from_slice(pv);
    out
}

impl DhExchange {
    pub fn generate(id: PkId) -> Result<Self> {
        match id {
            PkId::Dh2k | PkId::Dh3k | PkId::Dh4k => {
                let group = ffc_group(id).expect("ffc scheme");
                let mut rng = OsRng;
                let mut sv = rng.gen_biguint((group.sv_len * 8) as u64);
                while sv < BigUint::from(2u8) {
                    sv = rng.gen_biguint((group.sv_len * 8) as u64);
                }
                let pv_int = group.generator.modpow(&sv, &group.prime);
                let pv = to_fixed_be(&pv_int, group.pv_len);
                Ok(DhExchange::Ffc { group, sv, pv })
            }
            PkId::Ec25 => {
                let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
                let pv = strip_sec1_prefix(
                    p256::EncodedPoint::from(secret.public_key()).as_bytes(),
                );
                Ok(DhExchange::P256 { secret, pv })
            }
            PkId::Ec38 => {
                let secret = p384::ecdh::EphemeralSecret::random(&mut OsRng);
                let pv = strip_sec1_prefix(
                    p384::EncodedPoint::from(secret.public_key()).as_bytes(),
                );
                Ok(DhExchange::P384 { secret, pv })
            }
            PkId::Ec52 => {
                let secret = p521::ecdh::EphemeralSecret::random(&mut OsRng);
                let pv = strip_sec1_prefix(
                    p521::EncodedPoint::from(secret.public_key()).as_bytes(),
                );
                Ok(DhExchange::P521 { secret, pv })
            }
            PkId::Mult | PkId::Prsh => Err(Error::BadParam),
        }
    }

    pub fn public_value(&self) -> &[u8] {
        match self {
            DhExchange::Ffc { pv, .. }
            | DhExchange::P256 { pv, .. }
            | DhExchange::P384 { pv, .. }
            | DhExchange::P521 { pv, .. } => pv,
        }
    }

    /// Computes the raw DH result after validating the peer value.
    /// Validation failure is the possible_mitm1 condition.
    pub fn shared_secret(&self, peer_pv: &[u8]) -> Result<Vec<u8>> {
        match self {
            DhExchange::Ffc { group, sv, .. } => {
                let peer = validate_ffc_pv(group, peer_pv)?;
                let shared = peer.modpow(sv, &group.prime);
                Ok(to_fixed_be(&shared, group.pv_len))
            }
            DhExchange::P256 { secret, .. } => {
                let point = with_sec1_prefix(peer_pv);
                let public = p256::PublicKey::from_sec1_bytes(&point)
                    .map_err(|_| Error::Protocol(ProtocolError::PossibleMitm1))?;
                Ok(secret.diffie_hellman(&public).raw_secret_bytes().to_vec())
            }
            DhExchange::P384 { secret, .. } => {
                let point = with_sec1_prefix(peer_pv);
                let public = p384::PublicKey::from_sec1_bytes(&point)
                    .map_err(|_| Error::Protocol(ProtocolError::PossibleMitm1))?;
                Ok(secret.diffie_hellman(&public).raw_secret_bytes().to_vec())
            }
            DhExchange::P521 { secret, .. } => {
                let point = with_sec1_prefix(peer_pv);
                let public = p521::PublicKey::from_sec1_bytes(&point)
                    .map_err(|_| Error::Protocol(ProtocolError::PossibleMitm1))?;
                Ok(secret.diffie_hellman(&public).raw_secret_bytes().to_vec())
            }
        }
    }
}

/// Rejects degenerate finite-field public values: 0, 1, p-1 and anything
/// not below the modulus.
fn validate_ffc_pv(group: &FfcGroup, pv: &[u8]) -> Result<BigUint> {
    if pv.len() != group.pv_len {
        return Err(Error::Protocol(ProtocolError::PossibleMitm1));
    }
    let v = BigUint::from_bytes_be(pv);
    let one = BigUint::from(1u8);
    let p_minus_1 = &group.prime - &one;
    if v == BigUint::from(0u8) || v == one || v == p_minus_1 || v >= group.prime {
        return Err(Error::Protocol(ProtocolError::PossibleMitm1));
    }
    Ok(v)
}

/// Standalone check used when the peer pv arrives before our own
/// exchange exists (responder caching DHPart2).
pub fn validate_public_value(id: PkId, pv: &[u8]) -> Result<()> {
    match id {
        PkId::Dh2k | PkId::Dh3k | PkId::Dh4k => {
            validate_ffc_pv(ffc_group(id).expect("ffc scheme"), pv).map(|_| ())
        }
        PkId::Ec25 => p256::PublicKey::from_sec1_bytes(&with_sec1_prefix(pv))
            .map(|_| ())
            .map_err(|_| Error::Protocol(ProtocolError::PossibleMitm1)),
        PkId::Ec38 => p384::PublicKey::from_sec1_bytes(&with_sec1_prefix(pv))
            .map(|_| ())
            .map_err(|_| Error::Protocol(ProtocolError::PossibleMitm1)),
        PkId::Ec52 => p521::PublicKey::from_sec1_bytes(&with_sec1_prefix(pv))
            .map(|_| ())
            .map_err(|_| Error::Protocol(ProtocolError::PossibleMitm1)),
        PkId::Mult | PkId::Prsh => Ok(()),
    }
}

impl Drop for DhExchange {
    fn drop(&mut self) {
        // EC secrets wipe themselves; the bignum exponent is cleared here.
        if let DhExchange::Ffc { sv, .. } = self {
            *sv = BigUint::from(0u8);
        }
    }
}
