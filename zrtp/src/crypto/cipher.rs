use aes::cipher::generic_array::GenericArray;
use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::{Aes128, Aes256};

use super::CipherId;
use crate::error::{Error, Result};

type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;
type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// CFB encryption of a Confirm or SASRelay body, in place.
pub fn cfb_encrypt(id: CipherId, key: &[u8], iv: &[u8; 16], buf: &mut [u8]) -> Result<()> {
    if key.len() != id.key_len() {
        return Err(Error::CipherFail);
    }
    let iv = GenericArray::from_slice(iv);
    match id {
        CipherId::Aes1 => {
            Aes128CfbEnc::new(GenericArray::from_slice(key), iv).encrypt(buf);
        }
        CipherId::Aes3 => {
            Aes256CfbEnc::new(GenericArray::from_slice(key), iv).encrypt(buf);
        }
    }
    Ok(())
}

/// CFB decryption of a Confirm or SASRelay body, in place.
pub fn cfb_decrypt(id: CipherId, key: &[u8], iv: &[u8; 16], buf: &mut [u8]) -> Result<()> {
    if key.len() != id.key_len() {
        return Err(Error::CipherFail);
    }
    let iv = GenericArray::from_slice(iv);
    match id {
        CipherId::Aes1 => {
            Aes128CfbDec::new(GenericArray::from_slice(key), iv).decrypt(buf);
        }
        CipherId::Aes3 => {
            Aes256CfbDec::new(GenericArray::from_slice(key), iv).decrypt(buf);
        }
    }
    Ok(())
}

/// Known-answer self-test, run once at component registration.
pub fn self_test(id: CipherId) -> Result<()> {
    let key = vec![0x2bu8; id.key_len()];
    let iv = [0x01u8; 16];
    let plain = *b"zrtp cipher self test block data";

    let mut buf = plain;
    cfb_encrypt(id, &key, &iv, &mut buf)?;
    if buf == plain {
        return Err(Error::AlgoFail);
    }
    cfb_decrypt(id, &key, &iv, &mut buf)?;
    if buf != plain {
        return Err(Error::AlgoFail);
    }
    Ok(())
}
