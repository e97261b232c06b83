use crate::core::error::{ResolveError, ResolveResult};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use blowfish::Blowfish;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

/// The two cipher generations the upstream protocol has used. Which one a
/// resolver needs is fixed by its protocol version at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherStrategy {
    /// Blowfish/ECB with an 8-byte key.
    Ecb,
    /// AES-256/CBC with a 32-byte key and an all-zero IV.
    Cbc,
}

enum Engine {
    Ecb(Blowfish),
    Cbc(Box<Aes256>),
}

/// Fixed-key symmetric codec used to obfuscate resolver request paths.
///
/// Padding is PKCS#7 but unconditional: a block-aligned plaintext still
/// gains a full block of padding. Ciphertext is base64; the `url_safe`
/// variant substitutes `/` -> `_` and `+` -> `-` after encoding, which is
/// what the upstream expects inside URL path segments (this is not the
/// standard base64url alphabet).
pub struct CipherCodec {
    engine: Engine,
}

impl CipherCodec {
    pub fn ecb(key: &[u8; 8]) -> Self {
        let cipher = Blowfish::new_from_slice(key).expect("8-byte blowfish key");
        Self { engine: Engine::Ecb(cipher) }
    }

    pub fn cbc(key: &[u8; 32]) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key));
        Self { engine: Engine::Cbc(Box::new(cipher)) }
    }

    pub fn strategy(&self) -> CipherStrategy {
        match self.engine {
            Engine::Ecb(_) => CipherStrategy::Ecb,
            Engine::Cbc(_) => CipherStrategy::Cbc,
        }
    }

    fn block_size(&self) -> usize {
        match self.engine {
            Engine::Ecb(_) => 8,
            Engine::Cbc(_) => 16,
        }
    }

    pub fn encrypt(&self, plaintext: &str, url_safe: bool) -> String {
        let bs = self.block_size();
        let mut data = plaintext.as_bytes().to_vec();
        let pad = bs - data.len() % bs;
        data.extend(std::iter::repeat(pad as u8).take(pad));

        match &self.engine {
            Engine::Ecb(cipher) => {
                for block in data.chunks_exact_mut(bs) {
                    cipher.encrypt_block(GenericArray::from_mut_slice(block));
                }
            }
            Engine::Cbc(cipher) => {
                let mut prev = [0u8; 16];
                for block in data.chunks_exact_mut(bs) {
                    for (b, p) in block.iter_mut().zip(prev.iter()) {
                        *b ^= p;
                    }
                    cipher.encrypt_block(GenericArray::from_mut_slice(block));
                    prev.copy_from_slice(block);
                }
            }
        }

        let mut encoded = BASE64.encode(&data);
        if url_safe {
            encoded = encoded.replace('/', "_").replace('+', "-");
        }
        encoded
    }

    pub fn decrypt(&self, ciphertext: &str) -> ResolveResult<String> {
        // Reversing the substitution is harmless for standard base64 input,
        // so it is applied unconditionally.
        let normalized = ciphertext.trim().replace('_', "/").replace('-', "+");
        let mut data = BASE64
            .decode(normalized.as_bytes())
            .map_err(|e| ResolveError::protocol(format!("undecodable ciphertext: {e}")))?;

        let bs = self.block_size();
        if data.is_empty() || data.len() % bs != 0 {
            return Err(ResolveError::protocol(format!(
                "ciphertext length {} is not a multiple of the {bs}-byte block",
                data.len()
            )));
        }

        match &self.engine {
            Engine::Ecb(cipher) => {
                for block in data.chunks_exact_mut(bs) {
                    cipher.decrypt_block(GenericArray::from_mut_slice(block));
                }
            }
            Engine::Cbc(cipher) => {
                let mut prev = [0u8; 16];
                for block in data.chunks_exact_mut(bs) {
                    let saved: [u8; 16] = block.try_into().expect("exact chunk");
                    cipher.decrypt_block(GenericArray::from_mut_slice(block));
                    for (b, p) in block.iter_mut().zip(prev.iter()) {
                        *b ^= p;
                    }
                    prev = saved;
                }
            }
        }

        let pad = *data.last().expect("non-empty plaintext") as usize;
        if pad == 0 || pad > data.len() {
            return Err(ResolveError::protocol(format!("bad padding byte {pad}")));
        }
        data.truncate(data.len() - pad);

        String::from_utf8(data)
            .map_err(|e| ResolveError::protocol(format!("decrypted body is not UTF-8: {e}")))
    }
}
