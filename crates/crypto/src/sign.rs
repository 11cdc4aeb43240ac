// Path: crates/crypto/src/sign.rs

//! Ed25519 implementation of the crypto port.

use crate::hash::sha256;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hyperraft_api::CryptoProvider;
use hyperraft_types::error::CryptoError;
use hyperraft_types::{AccountId, Digest};
use rand::rngs::OsRng;
use rand::RngCore;

/// Signs with a local Ed25519 key; identity handles are verifying-key bytes.
#[derive(Debug)]
pub struct Ed25519Provider {
    signing_key: SigningKey,
    local_id: AccountId,
}

impl Ed25519Provider {
    /// Creates a provider from existing key material.
    pub fn new(signing_key: SigningKey) -> Self {
        let local_id = AccountId(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            local_id,
        }
    }

    /// Generates a fresh provider from the OS entropy source.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::new(SigningKey::from_bytes(&secret))
    }

    /// Generates a provider from a fixed seed. Test clusters use this to get
    /// stable, orderable validator ids.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(&seed))
    }

    fn verifying_key_of(id: &AccountId) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&id.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

impl CryptoProvider for Ed25519Provider {
    fn local_id(&self) -> AccountId {
        self.local_id
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.signing_key.sign(msg).to_bytes().to_vec())
    }

    fn verify(&self, id: &AccountId, msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        let key = Self::verifying_key_of(id)?;
        let sig = Signature::from_slice(sig)
            .map_err(|_| CryptoError::InvalidSignature)?;
        key.verify(msg, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    fn hash(&self, bytes: &[u8]) -> Digest {
        sha256(bytes)
    }

    fn aggregate_verify(
        &self,
        ids: &[AccountId],
        msg: &[u8],
        sigs: &[Vec<u8>],
    ) -> Result<(), CryptoError> {
        if ids.len() != sigs.len() {
            return Err(CryptoError::InvalidSignature);
        }
        for (id, sig) in ids.iter().zip(sigs) {
            self.verify(id, msg, sig)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let provider = Ed25519Provider::from_seed([7u8; 32]);
        let sig = provider.sign(b"payload").unwrap();
        provider
            .verify(&provider.local_id(), b"payload", &sig)
            .unwrap();
    }

    #[test]
    fn tampered_message_fails() {
        let provider = Ed25519Provider::from_seed([7u8; 32]);
        let sig = provider.sign(b"payload").unwrap();
        let err = provider
            .verify(&provider.local_id(), b"payload!", &sig)
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidSignature));
    }

    #[test]
    fn wrong_signer_fails() {
        let alice = Ed25519Provider::from_seed([1u8; 32]);
        let bob = Ed25519Provider::from_seed([2u8; 32]);
        let sig = alice.sign(b"payload").unwrap();
        assert!(alice.verify(&bob.local_id(), b"payload", &sig).is_err());
    }

    #[test]
    fn aggregate_verify_all_or_nothing() {
        let signers: Vec<_> = (1u8..=3).map(|b| Ed25519Provider::from_seed([b; 32])).collect();
        let msg = b"attest";
        let ids: Vec<_> = signers.iter().map(|s| s.local_id()).collect();
        let mut sigs: Vec<_> = signers.iter().map(|s| s.sign(msg).unwrap()).collect();

        signers[0].aggregate_verify(&ids, msg, &sigs).unwrap();

        sigs[1][0] ^= 0xFF;
        assert!(signers[0].aggregate_verify(&ids, msg, &sigs).is_err());
        assert!(signers[0].aggregate_verify(&ids[..2], msg, &sigs).is_err());
    }
}
