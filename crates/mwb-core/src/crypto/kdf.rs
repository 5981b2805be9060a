//! Passphrase normalisation and derivation of the session key and magic number.

use hmac::Hmac;
use sha2::{Digest, Sha512};

use super::{CryptoError, SessionKey};

/// Legacy decimal constant (`u64::MAX`) used as KDF salt and, truncated, as the IV.
///
/// Not a secret. It is fixed by the legacy peers.
pub const LEGACY_SEED: &str = "18446744073709551615";

/// PBKDF2 iteration count.
pub const KDF_ITERATIONS: u32 = 50_000;

/// Number of SHA-512 re-hashes applied when deriving the magic number.
pub const MAGIC_HASH_ITERATIONS: usize = 50_000;

/// Minimum passphrase length, counted after spaces are stripped.
pub const MIN_PASSPHRASE_LEN: usize = 16;

const MAGIC_INPUT_LEN: usize = 32;

/// Removes every space character; legacy peers ignore them when typing the key.
pub fn normalize_passphrase(passphrase: &str) -> String {
    passphrase.chars().filter(|c| *c != ' ').collect()
}

/// Normalises `passphrase` and checks the minimum length.
///
/// # Errors
///
/// Returns [`CryptoError::PassphraseTooShort`] when fewer than
/// [`MIN_PASSPHRASE_LEN`] characters remain.
pub fn validate_passphrase(passphrase: &str) -> Result<String, CryptoError> {
    let normalized = normalize_passphrase(passphrase);
    let len = normalized.chars().count();
    if len < MIN_PASSPHRASE_LEN {
        return Err(CryptoError::PassphraseTooShort {
            len,
            min: MIN_PASSPHRASE_LEN,
        });
    }
    Ok(normalized)
}

/// Derives the 256-bit AES key with PBKDF2-HMAC-SHA512.
///
/// The salt is [`LEGACY_SEED`] encoded as UTF-16LE.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if PBKDF2 rejects the parameters.
pub fn derive_key(passphrase: &str) -> Result<[u8; 32], CryptoError> {
    let password = normalize_passphrase(passphrase);
    let salt: Vec<u8> = LEGACY_SEED
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2::<Hmac<Sha512>>(password.as_bytes(), &salt, KDF_ITERATIONS, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Derives the 32-bit magic number.
///
/// The normalised passphrase is copied into a zero-padded 32-byte buffer,
/// hashed with SHA-512 and re-hashed [`MAGIC_HASH_ITERATIONS`] times. The
/// result packs `h[0] << 23`, `h[1] << 16`, `h[63] << 8` and `h[2]`. The
/// shift of 23 and the use of the final byte match the legacy peers and
/// must be kept.
///
/// An empty passphrase yields 0.
pub fn derive_magic(passphrase: &str) -> u32 {
    let normalized = normalize_passphrase(passphrase);
    if normalized.is_empty() {
        return 0;
    }

    let mut input = [0u8; MAGIC_INPUT_LEN];
    let bytes = normalized.as_bytes();
    let n = bytes.len().min(MAGIC_INPUT_LEN);
    input[..n].copy_from_slice(&bytes[..n]);

    let mut hash = Sha512::digest(input);
    for _ in 0..MAGIC_HASH_ITERATIONS {
        hash = Sha512::digest(hash);
    }

    let h = hash.as_slice();
    (u32::from(h[0]) << 23)
        .wrapping_add(u32::from(h[1]) << 16)
        .wrapping_add(u32::from(h[63]) << 8)
        .wrapping_add(u32::from(h[2]))
}

/// Derives both halves of the key material from one passphrase.
///
/// Length policy is not enforced here; see [`validate_passphrase`].
///
/// # Errors
///
/// Propagates [`CryptoError::KeyDerivation`].
pub fn derive_session_key(passphrase: &str) -> Result<SessionKey, CryptoError> {
    let key = derive_key(passphrase)?;
    let magic = derive_magic(passphrase);
    Ok(SessionKey::from_parts(key, magic))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSPHRASE: &str = "ABCDEFGHIJKLMNOP";

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_normalize_strips_all_spaces() {
        assert_eq!(normalize_passphrase(" ABCD EFGH  IJKL MNOP "), PASSPHRASE);
    }

    #[test]
    fn test_validate_accepts_sixteen_characters() {
        assert_eq!(validate_passphrase(PASSPHRASE).unwrap(), PASSPHRASE);
    }

    #[test]
    fn test_validate_rejects_fourteen_characters() {
        assert_eq!(
            validate_passphrase("ABCDEFGHIJKLMN"),
            Err(CryptoError::PassphraseTooShort { len: 14, min: 16 })
        );
    }

    #[test]
    fn test_validate_counts_after_space_stripping() {
        assert!(validate_passphrase("ABCD EFGH IJKL MN").is_err());
    }

    #[test]
    fn test_magic_known_answer() {
        assert_eq!(derive_magic(PASSPHRASE), 0x22AA_12EF);
        assert_eq!(derive_magic("0123456789abcdef"), 0x6C6E_8B44);
    }

    #[test]
    fn test_magic_ignores_spaces() {
        assert_eq!(derive_magic("ABCD EFGH IJKL MNOP "), derive_magic(PASSPHRASE));
    }

    #[test]
    fn test_magic_of_empty_passphrase_is_zero() {
        assert_eq!(derive_magic(""), 0);
        assert_eq!(derive_magic("   "), 0);
    }

    #[test]
    fn test_key_known_answer() {
        let key = derive_key(PASSPHRASE).unwrap();
        assert_eq!(
            hex(&key),
            "3453b9a396c7182adaca3d50756bd664555f987a3b439084ac41d8d680661b7e"
        );
    }

    #[test]
    fn test_session_key_is_deterministic_and_space_insensitive() {
        let a = derive_session_key(PASSPHRASE).unwrap();
        let b = derive_session_key(" ABCDEFGH IJKLMNOP").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.magic(), 0x22AA_12EF);
    }
}
