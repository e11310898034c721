pub mod cipher_aes_cm_hmac_sha1;

use bytes::Bytes;

use crate::context::RtpHeader;
use crate::error::Result;

/// Cipher represents a implementation of one protection profile pairing:
/// payload encryption plus packet authentication.
pub trait Cipher {
    /// Get RTP authenticated tag length.
    fn rtp_auth_tag_len(&self) -> usize;

    /// Get RTCP authenticated tag length.
    fn rtcp_auth_tag_len(&self) -> usize;

    /// Retrieved RTCP index out of an encrypted SRTCP packet.
    fn get_rtcp_index(&self, input: &[u8]) -> usize;

    fn encrypt_rtp(&mut self, plaintext: &[u8], header: &RtpHeader, roc: u32) -> Result<Bytes>;

    fn decrypt_rtp(&mut self, encrypted: &[u8], header: &RtpHeader, roc: u32) -> Result<Bytes>;

    fn encrypt_rtcp(&mut self, plaintext: &[u8], srtcp_index: usize, ssrc: u32) -> Result<Bytes>;

    fn decrypt_rtcp(&mut self, encrypted: &[u8], srtcp_index: usize, ssrc: u32) -> Result<Bytes>;
}
