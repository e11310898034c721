#[cfg(test)]
mod key_derivation_test;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

pub const LABEL_SRTP_ENCRYPTION: u8 = 0x00;
pub const LABEL_SRTP_AUTHENTICATION_TAG: u8 = 0x01;
pub const LABEL_SRTP_SALT: u8 = 0x02;
pub const LABEL_SRTCP_ENCRYPTION: u8 = 0x03;
pub const LABEL_SRTCP_AUTHENTICATION_TAG: u8 = 0x04;
pub const LABEL_SRTCP_SALT: u8 = 0x05;

const PRF_BLOCK_LEN: usize = 16;

/// AES-CM key derivation, https://tools.ietf.org/html/rfc3711#section-4.3
///
/// The input block is the master salt xored with the label at octet 7;
/// successive output blocks are produced by AES-encrypting the input block
/// with a 16-bit counter in the two rightmost octets.
pub fn aes_cm_key_derivation(
    label: u8,
    master_key: &[u8],
    master_salt: &[u8],
    index_over_kdr: usize,
    out_len: usize,
) -> Result<Vec<u8>> {
    if index_over_kdr != 0 {
        // 24-bit "index DIV kdr" would have to be xored into the prf input.
        return Err(Error::UnsupportedIndexOverKdr);
    }

    let mut prf_in = [0u8; PRF_BLOCK_LEN];
    prf_in[..master_salt.len()].copy_from_slice(master_salt);
    prf_in[7] ^= label;

    let n_blocks = out_len.div_ceil(PRF_BLOCK_LEN);
    let mut out = Vec::with_capacity(n_blocks * PRF_BLOCK_LEN);

    match master_key.len() {
        16 => {
            let block = Aes128::new(GenericArray::from_slice(master_key));
            for i in 0..n_blocks {
                BigEndian::write_u16(&mut prf_in[PRF_BLOCK_LEN - 2..], i as u16);
                let mut ga = GenericArray::clone_from_slice(&prf_in);
                block.encrypt_block(&mut ga);
                out.extend_from_slice(&ga);
            }
        }
        32 => {
            let block = Aes256::new(GenericArray::from_slice(master_key));
            for i in 0..n_blocks {
                BigEndian::write_u16(&mut prf_in[PRF_BLOCK_LEN - 2..], i as u16);
                let mut ga = GenericArray::clone_from_slice(&prf_in);
                block.encrypt_block(&mut ga);
                out.extend_from_slice(&ga);
            }
        }
        n => return Err(Error::UnsupportedKeyLength(n)),
    }

    out.truncate(out_len);
    Ok(out)
}

/// Generate the per-packet IV, https://tools.ietf.org/html/rfc3711#section-4.1.1
///
/// i = 2^16 * ROC + SEQ
/// IV = (k_s * 2^16) XOR (SSRC * 2^64) XOR (i * 2^16)
pub fn generate_counter(
    sequence_number: u16,
    rollover_counter: u32,
    ssrc: u32,
    session_salt: &[u8],
) -> [u8; 16] {
    debug_assert!(session_salt.len() <= 16);

    let mut counter = [0u8; 16];
    BigEndian::write_u32(&mut counter[4..8], ssrc);
    BigEndian::write_u32(&mut counter[8..12], rollover_counter);
    BigEndian::write_u32(&mut counter[12..16], (sequence_number as u32) << 16);

    for (i, s) in session_salt.iter().enumerate() {
        counter[i] ^= s;
    }

    counter
}
