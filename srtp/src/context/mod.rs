#[cfg(test)]
mod context_test;
#[cfg(test)]
mod srtcp_test;
#[cfg(test)]
mod srtp_test;

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};

use crate::cipher::cipher_aes_cm_hmac_sha1::CipherAesCmHmacSha1;
use crate::cipher::Cipher;
use crate::error::{Error, Result};
use crate::option::*;
use crate::protection_profile::ProtectionProfile;
use crate::replay_detector::ReplayDetector;

pub mod srtcp;
pub mod srtp;

pub const MAX_ROC: u32 = u32::MAX;
pub const SEQ_NUM_MEDIAN: u16 = 1 << 15;
pub const SEQ_NUM_MAX: u16 = u16::MAX;
pub const MAX_SEQUENCE_NUMBER: u16 = u16::MAX;
pub const MAX_SRTCP_INDEX: usize = 0x7fff_ffff;

pub const SRTCP_INDEX_SIZE: usize = 4;
/// Fixed RTCP header plus the sender SSRC; everything after is encrypted.
pub const RTCP_ENCRYPTION_OFFSET: usize = 8;

const RTP_FIXED_HEADER_LEN: usize = 12;

/// The RTP header fields the transformer needs: where the payload starts,
/// the 16-bit sequence number and the SSRC.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub header_len: usize,
    pub sequence_number: u16,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < RTP_FIXED_HEADER_LEN {
            return Err(Error::RtpHeaderTooSmall(raw.len()));
        }

        let b0 = raw[0];
        let has_extension = (b0 >> 4) & 0x1 != 0;
        let cc = (b0 & 0xf) as usize;

        let mut header_len = RTP_FIXED_HEADER_LEN + cc * 4;
        if raw.len() < header_len {
            return Err(Error::RtpHeaderTooSmall(raw.len()));
        }
        if has_extension {
            if raw.len() < header_len + 4 {
                return Err(Error::RtpHeaderTooSmall(raw.len()));
            }
            let ext_words = BigEndian::read_u16(&raw[header_len + 2..header_len + 4]) as usize;
            header_len += 4 + ext_words * 4;
            if raw.len() < header_len {
                return Err(Error::RtpHeaderTooSmall(raw.len()));
            }
        }

        Ok(RtpHeader {
            header_len,
            sequence_number: BigEndian::read_u16(&raw[2..4]),
            ssrc: BigEndian::read_u32(&raw[8..12]),
        })
    }
}

/// Encrypt/decrypt state for a single SRTP SSRC.
#[derive(Default)]
pub(crate) struct SrtpSsrcState {
    ssrc: u32,
    index: u64,
    rollover_has_processed: bool,
    replay_detector: Option<Box<dyn ReplayDetector + Send + 'static>>,
}

/// Encrypt/decrypt state for a single SRTCP SSRC.
#[derive(Default)]
pub(crate) struct SrtcpSsrcState {
    ssrc: u32,
    srtcp_index: usize,
    replay_detector: Option<Box<dyn ReplayDetector + Send + 'static>>,
}

impl SrtpSsrcState {
    pub fn next_rollover_count(&self, sequence_number: u16) -> (u32, i32, bool) {
        let local_roc = (self.index >> 16) as u32;
        let local_seq = self.index as u16;

        let mut guess_roc = local_roc;

        let diff = if self.rollover_has_processed {
            let seq = (sequence_number as i32).wrapping_sub(local_seq as i32);
            // Guessing a rollover backwards only makes sense once the index
            // has moved past the first half-window.
            if self.index > SEQ_NUM_MEDIAN as u64 {
                if local_seq < SEQ_NUM_MEDIAN {
                    if seq > SEQ_NUM_MEDIAN as i32 {
                        guess_roc = local_roc.wrapping_sub(1);
                        seq.wrapping_sub(SEQ_NUM_MAX as i32 + 1)
                    } else {
                        seq
                    }
                } else if local_seq - SEQ_NUM_MEDIAN > sequence_number {
                    guess_roc = local_roc.wrapping_add(1);
                    seq.wrapping_add(SEQ_NUM_MAX as i32 + 1)
                } else {
                    seq
                }
            } else {
                seq
            }
        } else {
            0i32
        };

        (guess_roc, diff, guess_roc == 0 && local_roc == MAX_ROC)
    }

    /// https://tools.ietf.org/html/rfc3550#appendix-A.1
    pub fn update_rollover_count(&mut self, sequence_number: u16, diff: i32) {
        if !self.rollover_has_processed {
            self.index |= sequence_number as u64;
            self.rollover_has_processed = true;
        } else {
            self.index = self.index.wrapping_add(diff as u64);
        }
    }
}

/// Context represents one direction of SRTP cryptographic state.
///
/// A context must be used either only for protection or only for
/// unprotection; the per-SSRC replay windows assume one direction.
pub struct Context {
    cipher: Box<dyn Cipher + Send>,

    srtp_ssrc_states: HashMap<u32, SrtpSsrcState>,
    srtcp_ssrc_states: HashMap<u32, SrtcpSsrcState>,

    new_srtp_replay_detector: ContextOption,
    new_srtcp_replay_detector: ContextOption,
}

impl Context {
    pub fn new(
        master_key: &[u8],
        master_salt: &[u8],
        profile: ProtectionProfile,
        srtp_ctx_opt: Option<ContextOption>,
        srtcp_ctx_opt: Option<ContextOption>,
    ) -> Result<Context> {
        let key_len = profile.key_len();
        let salt_len = profile.salt_len();

        if master_key.len() != key_len {
            return Err(Error::SrtpMasterKeyLength(key_len, master_key.len()));
        } else if master_salt.len() != salt_len {
            return Err(Error::SrtpSaltLength(salt_len, master_salt.len()));
        }

        let cipher: Box<dyn Cipher + Send> =
            Box::new(CipherAesCmHmacSha1::new(profile, master_key, master_salt)?);

        log::debug!("created SRTP context, profile {profile:?}");

        Ok(Context {
            cipher,
            srtp_ssrc_states: HashMap::new(),
            srtcp_ssrc_states: HashMap::new(),
            new_srtp_replay_detector: srtp_ctx_opt.unwrap_or_else(srtp_replay_protection_default),
            new_srtcp_replay_detector: srtcp_ctx_opt
                .unwrap_or_else(srtcp_replay_protection_default),
        })
    }

    fn get_srtp_ssrc_state(&mut self, ssrc: u32) -> &mut SrtpSsrcState {
        let s = SrtpSsrcState {
            ssrc,
            replay_detector: Some((self.new_srtp_replay_detector)()),
            ..Default::default()
        };
        self.srtp_ssrc_states.entry(ssrc).or_insert(s)
    }

    fn get_srtcp_ssrc_state(&mut self, ssrc: u32) -> &mut SrtcpSsrcState {
        let s = SrtcpSsrcState {
            ssrc,
            replay_detector: Some((self.new_srtcp_replay_detector)()),
            ..Default::default()
        };
        self.srtcp_ssrc_states.entry(ssrc).or_insert(s)
    }

    /// Returns the SRTP rollover counter of the given SSRC.
    pub fn get_roc(&self, ssrc: u32) -> Option<u32> {
        self.srtp_ssrc_states.get(&ssrc).map(|s| (s.index >> 16) as u32)
    }

    /// Sets the SRTP rollover counter of the given SSRC.
    pub fn set_roc(&mut self, ssrc: u32, roc: u32) {
        let state = self.get_srtp_ssrc_state(ssrc);
        state.index = (roc as u64) << 16;
        state.rollover_has_processed = false;
    }

    /// Returns the SRTCP index of the given SSRC.
    pub fn get_index(&self, ssrc: u32) -> Option<usize> {
        self.srtcp_ssrc_states.get(&ssrc).map(|s| s.srtcp_index)
    }

    /// Sets the SRTCP index of the given SSRC.
    pub fn set_index(&mut self, ssrc: u32, index: usize) {
        self.get_srtcp_ssrc_state(ssrc).srtcp_index = index % (MAX_SRTCP_INDEX + 1);
    }
}
