#[cfg(test)]
mod crypto_test;

pub mod cipher;
pub mod dh_groups;
pub mod hash;
pub mod pk;
pub mod sas;
mod words;

use crate::error::{Error, Result};

/// The five crypto component categories negotiated in Hello.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ComponentKind {
    Hash,
    Cipher,
    AuthTagLength,
    PkExchange,
    Sas,
}

macro_rules! wire_id_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The 4-character identifier used on the wire.
            pub fn wire_id(&self) -> &'static [u8; 4] {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            pub fn from_wire(id: &[u8]) -> Option<Self> {
                $(
                    if id == $wire {
                        return Some($name::$variant);
                    }
                )+
                None
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let id = self.wire_id();
                write!(f, "{}", String::from_utf8_lossy(&id[..]).trim_end())
            }
        }
    };
}

wire_id_enum!(
    /// Hash algorithm used for the KDF, hash chains and commitments.
    HashId {
        S256 => b"S256",
        S384 => b"S384",
    }
);

wire_id_enum!(
    /// Block cipher for SRTP media and Confirm body protection.
    CipherId {
        Aes1 => b"AES1",
        Aes3 => b"AES3",
    }
);

wire_id_enum!(
    /// SRTP authentication tag length.
    TagLengthId {
        Hs32 => b"HS32",
        Hs80 => b"HS80",
    }
);

wire_id_enum!(
    /// Key agreement scheme. Mult and Prsh skip the DH exchange.
    PkId {
        Dh2k => b"DH2k",
        Dh3k => b"DH3k",
        Dh4k => b"DH4k",
        Ec25 => b"EC25",
        Ec38 => b"EC38",
        Ec52 => b"EC52",
        Mult => b"Mult",
        Prsh => b"Prsh",
    }
);

wire_id_enum!(
    /// Short authentication string rendering scheme.
    SasId {
        B32 => b"B32 ",
        B256 => b"B256",
    }
);

impl CipherId {
    pub fn key_len(&self) -> usize {
        match self {
            CipherId::Aes1 => 16,
            CipherId::Aes3 => 32,
        }
    }
}

impl TagLengthId {
    pub fn tag_len(&self) -> usize {
        match self {
            TagLengthId::Hs32 => 4,
            TagLengthId::Hs80 => 10,
        }
    }
}

impl PkId {
    /// Length of the public value carried in DHPart, in bytes.
    pub fn pv_len(&self) -> usize {
        match self {
            PkId::Dh2k => 256,
            PkId::Dh3k => 384,
            PkId::Dh4k => 512,
            PkId::Ec25 => 64,
            PkId::Ec38 => 96,
            PkId::Ec52 => 132,
            PkId::Mult | PkId::Prsh => 0,
        }
    }

    pub fn is_fast(&self) -> bool {
        matches!(self, PkId::Mult | PkId::Prsh)
    }
}

/// Process-wide registry of usable components. A component is offered in
/// Hello only after its self-test passed at registration.
pub struct ComponentRegistry {
    hashes: Vec<HashId>,
    ciphers: Vec<CipherId>,
    tag_lengths: Vec<TagLengthId>,
    pk_schemes: Vec<PkId>,
    sas_schemes: Vec<SasId>,
}

impl ComponentRegistry {
    /// Registers every built-in component whose known-answer self-test
    /// passes. A failing self-test keeps that component out of the
    /// offered lists but does not fail engine startup.
    pub fn with_defaults() -> Self {
        let mut reg = ComponentRegistry {
            hashes: Vec::new(),
            ciphers: Vec::new(),
            tag_lengths: Vec::new(),
            pk_schemes: Vec::new(),
            sas_schemes: Vec::new(),
        };

        for &h in HashId::ALL {
            match hash::self_test(h) {
                Ok(()) => reg.hashes.push(h),
                Err(e) => log::error!("hash component {h} failed self-test: {e}"),
            }
        }
        for &c in CipherId::ALL {
            match cipher::self_test(c) {
                Ok(()) => reg.ciphers.push(c),
                Err(e) => log::error!("cipher component {c} failed self-test: {e}"),
            }
        }
        reg.tag_lengths.extend_from_slice(TagLengthId::ALL);
        reg.pk_schemes.extend_from_slice(PkId::ALL);
        for &s in SasId::ALL {
            reg.sas_schemes.push(s);
        }

        reg
    }

    pub fn has_hash(&self, id: HashId) -> bool {
        self.hashes.contains(&id)
    }

    pub fn has_cipher(&self, id: CipherId) -> bool {
        self.ciphers.contains(&id)
    }

    pub fn has_pk(&self, id: PkId) -> bool {
        self.pk_schemes.contains(&id)
    }

    /// Validates that every id a profile lists is actually registered.
    pub fn check_profile(&self, profile: &crate::config::Profile) -> Result<()> {
        if profile.hash_schemes.iter().any(|h| !self.hashes.contains(h)) {
            return Err(Error::UnknownComponent("hash".into()));
        }
        if profile
            .cipher_types
            .iter()
            .any(|c| !self.ciphers.contains(c))
        {
            return Err(Error::UnknownComponent("cipher".into()));
        }
        if profile.pk_schemes.iter().any(|p| !self.pk_schemes.contains(p)) {
            return Err(Error::UnknownComponent("pk".into()));
        }
        if profile
            .auth_tag_lens
            .iter()
            .any(|a| !self.tag_lengths.contains(a))
        {
            return Err(Error::UnknownComponent("auth tag length".into()));
        }
        if profile.sas_schemes.iter().any(|s| !self.sas_schemes.contains(s)) {
            return Err(Error::UnknownComponent("sas".into()));
        }
        Ok(())
    }
}

/// First element of the local preference list also advertised by the peer.
pub fn select_component<T: Copy + PartialEq>(local_pref: &[T], peer: &[T]) -> Option<T> {
    local_pref.iter().copied().find(|c| peer.contains(c))
}
