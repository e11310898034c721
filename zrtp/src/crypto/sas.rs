use super::words::{EVEN_WORDS, ODD_WORDS};
use super::SasId;

/// The base32 alphabet used for SAS rendering. Chosen to avoid
/// easily-confused characters when read aloud.
const BASE32_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// The two rendered SAS strings a user compares verbally. The base32
/// scheme fills only the first; base256 yields one word per string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedSas {
    pub sas1: String,
    pub sas2: String,
}

/// Renders the SAS strings from the leftmost bytes of the SAS hash.
pub fn render(id: SasId, sashash: &[u8]) -> RenderedSas {
    debug_assert!(sashash.len() >= 4);
    match id {
        SasId::B32 => RenderedSas {
            sas1: base32_20bits(sashash),
            sas2: String::new(),
        },
        SasId::B256 => RenderedSas {
            sas1: EVEN_WORDS[sashash[0] as usize].to_owned(),
            sas2: ODD_WORDS[sashash[1] as usize].to_owned(),
        },
    }
}

/// Four characters from the leftmost 20 bits of the SAS value.
fn base32_20bits(sashash: &[u8]) -> String {
    let v = u32::from_be_bytes([sashash[0], sashash[1], sashash[2], sashash[3]]);
    let mut out = String::with_capacity(4);
    for i in 0..4 {
        let idx = ((v >> (32 - 5 * (i + 1))) & 0x1f) as usize;
        out.push(BASE32_ALPHABET[idx] as char);
    }
    out
}

#[cfg(test)]
mod sas_test {
    use super::*;

    #[test]
    fn test_base32_is_four_chars_from_top_bits() {
        let hash = [0x00, 0x00, 0x0f, 0xff, 0xaa, 0xbb];
        let sas = render(SasId::B32, &hash);
        assert_eq!(sas.sas1.len(), 4);
        assert_eq!(sas.sas1, "yyyy", "top 20 bits are zero");
        assert!(sas.sas2.is_empty());
    }

    #[test]
    fn test_base32_varies_with_input() {
        let a = render(SasId::B32, &[0x12, 0x34, 0x50, 0x00]);
        let b = render(SasId::B32, &[0x12, 0x34, 0x60, 0x00]);
        assert_ne!(a.sas1, b.sas1);
    }

    #[test]
    fn test_base256_words() {
        let sas = render(SasId::B256, &[0x00, 0x01, 0, 0]);
        assert_eq!(sas.sas1, "aardvark");
        assert_eq!(sas.sas2, "adviser");

        let sas = render(SasId::B256, &[0xff, 0xff, 0, 0]);
        assert_eq!(sas.sas1, "Zulu");
        assert_eq!(sas.sas2, "Yucatan");
    }
}
