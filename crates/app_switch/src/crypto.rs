//! Cryptographic primitives of the encrypted payload variant.
//!
//! Symmetric side is AES-256-GCM with the nonce prepended to the
//! ciphertext; asymmetric side is RSA-OAEP under the switch target's public
//! key. Also home of the certificate digest used for wallet signature
//! pinning.

use error_stack::ResultExt;
use ring::{
    aead::{self, Aad, LessSafeKey, Nonce, UnboundKey},
    rand::{SecureRandom, SystemRandom},
};

use crate::{
    consts,
    errors::{CustomResult, SwitchError},
};

/// Symmetric encryption of a message under a shared secret.
pub trait EncodeMessage {
    fn encode_message(&self, secret: &[u8], msg: &[u8]) -> CustomResult<Vec<u8>, SwitchError>;
}

/// Symmetric decryption of a message under a shared secret.
pub trait DecodeMessage {
    fn decode_message(&self, secret: &[u8], msg: &[u8]) -> CustomResult<Vec<u8>, SwitchError>;
}

/// AES-256-GCM with a random nonce prepended to the ciphertext.
#[derive(Debug)]
pub struct GcmAes256;

impl EncodeMessage for GcmAes256 {
    fn encode_message(&self, secret: &[u8], msg: &[u8]) -> CustomResult<Vec<u8>, SwitchError> {
        let key = UnboundKey::new(&aead::AES_256_GCM, secret)
            .change_context(SwitchError::EncodingFailed)?;
        let key = LessSafeKey::new(key);

        let mut nonce_bytes = [0u8; aead::NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .change_context(SwitchError::EncodingFailed)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = msg.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .change_context(SwitchError::EncodingFailed)?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }
}

impl DecodeMessage for GcmAes256 {
    fn decode_message(&self, secret: &[u8], msg: &[u8]) -> CustomResult<Vec<u8>, SwitchError> {
        let key = UnboundKey::new(&aead::AES_256_GCM, secret)
            .change_context(SwitchError::DecodingFailed)?;
        let key = LessSafeKey::new(key);

        let nonce_bytes = msg
            .get(..aead::NONCE_LEN)
            .ok_or(SwitchError::DecodingFailed)
            .attach_printable("Ciphertext shorter than the nonce prefix")?;
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .change_context(SwitchError::DecodingFailed)?;

        let mut in_out = msg[aead::NONCE_LEN..].to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .change_context(SwitchError::DecodingFailed)?;

        Ok(plaintext.to_vec())
    }
}

/// RSA-OAEP encryption under a PEM-encoded public key. Only the encrypting
/// half lives in this SDK; the matching private key belongs to the switch
/// target.
#[derive(Debug)]
pub struct RsaOaep;

impl RsaOaep {
    pub fn encrypt(
        &self,
        public_key_pem: &[u8],
        msg: &[u8],
    ) -> CustomResult<Vec<u8>, SwitchError> {
        let rsa = openssl::rsa::Rsa::public_key_from_pem(public_key_pem)
            .change_context(SwitchError::EncodingFailed)
            .attach_printable("Switch target public key is not valid PEM")?;

        let mut sealed = vec![0; rsa.size() as usize];
        let written = rsa
            .public_encrypt(msg, &mut sealed, openssl::rsa::Padding::PKCS1_OAEP)
            .change_context(SwitchError::EncodingFailed)?;
        sealed.truncate(written);
        Ok(sealed)
    }
}

/// Fresh random key for one encrypted-variant envelope.
pub fn generate_aes256_key() -> CustomResult<[u8; consts::AES_256_KEY_LEN], SwitchError> {
    let mut key = [0u8; consts::AES_256_KEY_LEN];
    SystemRandom::new()
        .fill(&mut key)
        .change_context(SwitchError::EncodingFailed)?;
    Ok(key)
}

/// Base64 SHA-256 digest over a signing certificate's subject, issuer and
/// public key, the value wallet recipes pin against.
pub fn certificate_digest(subject: &[u8], issuer: &[u8], public_key: &[u8]) -> String {
    use base64::Engine;

    let mut message = Vec::with_capacity(subject.len() + issuer.len() + public_key.len());
    message.extend_from_slice(subject);
    message.extend_from_slice(issuer);
    message.extend_from_slice(public_key);

    let digest = ring::digest::digest(&ring::digest::SHA256, &message);
    consts::BASE64_ENGINE.encode(digest.as_ref())
}
