use aes::cipher::generic_array::GenericArray;
use aes::cipher::{AsyncStreamCipher, KeyIvInit, StreamCipher};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use super::Cipher;
use crate::context::{RtpHeader, RTCP_ENCRYPTION_OFFSET, SRTCP_INDEX_SIZE};
use crate::error::{Error, Result};
use crate::key_derivation::*;
use crate::protection_profile::{CipherMode, ProtectionProfile};

type HmacSha1 = Hmac<Sha1>;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type Aes128CfbEnc = cfb_mode::Encryptor<aes::Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<aes::Aes128>;
type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

/// AES-CM (or AES-CFB) payload encryption with truncated HMAC-SHA1
/// authentication, the only transform family ZRTP negotiates.
pub(crate) struct CipherAesCmHmacSha1 {
    profile: ProtectionProfile,
    srtp_session_key: Vec<u8>,
    srtp_session_salt: Vec<u8>,
    srtp_session_auth: HmacSha1,
    srtcp_session_key: Vec<u8>,
    srtcp_session_salt: Vec<u8>,
    srtcp_session_auth: HmacSha1,
}

impl CipherAesCmHmacSha1 {
    pub fn new(profile: ProtectionProfile, master_key: &[u8], master_salt: &[u8]) -> Result<Self> {
        let srtp_session_key = aes_cm_key_derivation(
            LABEL_SRTP_ENCRYPTION,
            master_key,
            master_salt,
            0,
            master_key.len(),
        )?;
        let srtcp_session_key = aes_cm_key_derivation(
            LABEL_SRTCP_ENCRYPTION,
            master_key,
            master_salt,
            0,
            master_key.len(),
        )?;

        let srtp_session_salt = aes_cm_key_derivation(
            LABEL_SRTP_SALT,
            master_key,
            master_salt,
            0,
            master_salt.len(),
        )?;
        let srtcp_session_salt = aes_cm_key_derivation(
            LABEL_SRTCP_SALT,
            master_key,
            master_salt,
            0,
            master_salt.len(),
        )?;

        let auth_key_len = profile.auth_key_len();
        let srtp_session_auth_tag = aes_cm_key_derivation(
            LABEL_SRTP_AUTHENTICATION_TAG,
            master_key,
            master_salt,
            0,
            auth_key_len,
        )?;
        let srtcp_session_auth_tag = aes_cm_key_derivation(
            LABEL_SRTCP_AUTHENTICATION_TAG,
            master_key,
            master_salt,
            0,
            auth_key_len,
        )?;

        // new_from_slice only fails on empty input, which auth_key_len precludes
        let srtp_session_auth = HmacSha1::new_from_slice(&srtp_session_auth_tag)
            .map_err(|_| Error::UnsupportedKeyLength(auth_key_len))?;
        let srtcp_session_auth = HmacSha1::new_from_slice(&srtcp_session_auth_tag)
            .map_err(|_| Error::UnsupportedKeyLength(auth_key_len))?;

        Ok(CipherAesCmHmacSha1 {
            profile,
            srtp_session_key,
            srtp_session_salt,
            srtp_session_auth,
            srtcp_session_key,
            srtcp_session_salt,
            srtcp_session_auth,
        })
    }

    /// https://tools.ietf.org/html/rfc3711#section-4.2
    ///
    /// For SRTP the authenticated portion is the packet before the tag
    /// concatenated with the rollover counter, M = Authenticated Portion || ROC.
    /// The HMAC output is truncated to the n_tag left-most bits.
    fn generate_srtp_auth_tag(&self, buf: &[u8], roc: u32) -> [u8; 20] {
        let mut signer = self.srtp_session_auth.clone();
        signer.update(buf);
        signer.update(&roc.to_be_bytes());
        signer.finalize().into_bytes().into()
    }

    fn generate_srtcp_auth_tag(&self, buf: &[u8]) -> [u8; 20] {
        let mut signer = self.srtcp_session_auth.clone();
        signer.update(buf);
        signer.finalize().into_bytes().into()
    }

    fn apply_keystream(&self, buf: &mut [u8], counter: &[u8; 16], srtcp: bool, encrypt: bool) {
        let key = if srtcp {
            &self.srtcp_session_key
        } else {
            &self.srtp_session_key
        };
        let iv = GenericArray::from_slice(counter);

        match (self.profile.cipher_mode(), key.len()) {
            (CipherMode::Counter, 16) => {
                Aes128Ctr::new(GenericArray::from_slice(key), iv).apply_keystream(buf);
            }
            (CipherMode::Counter, _) => {
                Aes256Ctr::new(GenericArray::from_slice(key), iv).apply_keystream(buf);
            }
            (CipherMode::Feedback, 16) => {
                if encrypt {
                    Aes128CfbEnc::new(GenericArray::from_slice(key), iv).encrypt(buf);
                } else {
                    Aes128CfbDec::new(GenericArray::from_slice(key), iv).decrypt(buf);
                }
            }
            (CipherMode::Feedback, _) => {
                if encrypt {
                    Aes256CfbEnc::new(GenericArray::from_slice(key), iv).encrypt(buf);
                } else {
                    Aes256CfbDec::new(GenericArray::from_slice(key), iv).decrypt(buf);
                }
            }
        }
    }
}

impl Cipher for CipherAesCmHmacSha1 {
    fn rtp_auth_tag_len(&self) -> usize {
        self.profile.rtp_auth_tag_len()
    }

    fn rtcp_auth_tag_len(&self) -> usize {
        self.profile.rtcp_auth_tag_len()
    }

    fn get_rtcp_index(&self, input: &[u8]) -> usize {
        let tail_offset = input.len() - (self.rtcp_auth_tag_len() + SRTCP_INDEX_SIZE);
        (BigEndian::read_u32(&input[tail_offset..tail_offset + SRTCP_INDEX_SIZE]) & !(1u32 << 31))
            as usize
    }

    fn encrypt_rtp(&mut self, plaintext: &[u8], header: &RtpHeader, roc: u32) -> Result<Bytes> {
        let mut writer = Vec::with_capacity(plaintext.len() + self.rtp_auth_tag_len());
        writer.extend_from_slice(plaintext);

        let counter = generate_counter(
            header.sequence_number,
            roc,
            header.ssrc,
            &self.srtp_session_salt,
        );
        self.apply_keystream(&mut writer[header.header_len..], &counter, false, true);

        let auth_tag = &self.generate_srtp_auth_tag(&writer, roc)[..self.rtp_auth_tag_len()];
        writer.extend_from_slice(auth_tag);

        Ok(Bytes::from(writer))
    }

    fn decrypt_rtp(&mut self, encrypted: &[u8], header: &RtpHeader, roc: u32) -> Result<Bytes> {
        let encrypted_len = encrypted.len();
        if encrypted_len < header.header_len + self.rtp_auth_tag_len() {
            return Err(Error::SrtpTooSmall(
                encrypted_len,
                header.header_len + self.rtp_auth_tag_len(),
            ));
        }

        let actual_tag = &encrypted[encrypted_len - self.rtp_auth_tag_len()..];
        let cipher_text = &encrypted[..encrypted_len - self.rtp_auth_tag_len()];

        // Constant time comparison prevents a tag-forging timing oracle.
        let expected_tag =
            &self.generate_srtp_auth_tag(cipher_text, roc)[..self.rtp_auth_tag_len()];
        if actual_tag.ct_eq(expected_tag).unwrap_u8() != 1 {
            return Err(Error::RtpFailedToVerifyAuthTag);
        }

        let mut writer = Vec::with_capacity(cipher_text.len());
        writer.extend_from_slice(cipher_text);

        let counter = generate_counter(
            header.sequence_number,
            roc,
            header.ssrc,
            &self.srtp_session_salt,
        );
        self.apply_keystream(&mut writer[header.header_len..], &counter, false, false);

        Ok(Bytes::from(writer))
    }

    fn encrypt_rtcp(&mut self, plaintext: &[u8], srtcp_index: usize, ssrc: u32) -> Result<Bytes> {
        let mut writer =
            Vec::with_capacity(plaintext.len() + SRTCP_INDEX_SIZE + self.rtcp_auth_tag_len());
        writer.extend_from_slice(plaintext);

        let counter = generate_counter(
            (srtcp_index & 0xffff) as u16,
            (srtcp_index >> 16) as u32,
            ssrc,
            &self.srtcp_session_salt,
        );
        self.apply_keystream(&mut writer[RTCP_ENCRYPTION_OFFSET..], &counter, true, true);

        // SRTCP index word with the E-bit; always encrypted here.
        writer.put_u32(srtcp_index as u32 | (1u32 << 31));

        let auth_tag = &self.generate_srtcp_auth_tag(&writer)[..self.rtcp_auth_tag_len()];
        writer.extend_from_slice(auth_tag);

        Ok(Bytes::from(writer))
    }

    fn decrypt_rtcp(&mut self, encrypted: &[u8], srtcp_index: usize, ssrc: u32) -> Result<Bytes> {
        let encrypted_len = encrypted.len();
        let min_len = RTCP_ENCRYPTION_OFFSET + SRTCP_INDEX_SIZE + self.rtcp_auth_tag_len();
        if encrypted_len < min_len {
            return Err(Error::SrtcpTooSmall(encrypted_len, min_len));
        }

        let tail_offset = encrypted_len - (self.rtcp_auth_tag_len() + SRTCP_INDEX_SIZE);

        let is_encrypted = encrypted[tail_offset] >> 7;
        if is_encrypted == 0 {
            return Ok(Bytes::copy_from_slice(&encrypted[..tail_offset]));
        }

        let actual_tag = &encrypted[encrypted_len - self.rtcp_auth_tag_len()..];
        if actual_tag.len() != self.rtcp_auth_tag_len() {
            return Err(Error::RtcpInvalidLengthAuthTag(
                actual_tag.len(),
                self.rtcp_auth_tag_len(),
            ));
        }
        let cipher_text = &encrypted[..encrypted_len - self.rtcp_auth_tag_len()];

        let expected_tag = &self.generate_srtcp_auth_tag(cipher_text)[..self.rtcp_auth_tag_len()];
        if actual_tag.ct_eq(expected_tag).unwrap_u8() != 1 {
            return Err(Error::RtcpFailedToVerifyAuthTag);
        }

        let mut writer = Vec::with_capacity(tail_offset);
        writer.extend_from_slice(&encrypted[..tail_offset]);

        let counter = generate_counter(
            (srtcp_index & 0xffff) as u16,
            (srtcp_index >> 16) as u32,
            ssrc,
            &self.srtcp_session_salt,
        );
        self.apply_keystream(&mut writer[RTCP_ENCRYPTION_OFFSET..], &counter, true, false);

        Ok(Bytes::from(writer))
    }
}

impl Drop for CipherAesCmHmacSha1 {
    fn drop(&mut self) {
        for b in self
            .srtp_session_key
            .iter_mut()
            .chain(self.srtcp_session_key.iter_mut())
            .chain(self.srtp_session_salt.iter_mut())
            .chain(self.srtcp_session_salt.iter_mut())
        {
            *b = 0;
        }
    }
}
