use secp256k1::{schnorr, Message, Secp256k1, VerifyOnly, XOnlyPublicKey};

/// Verifies an event signature over its id.
///
/// Returns `Ok(false)` for a well-formed signature that does not verify and
/// `Err(reason)` when the inputs cannot be decoded at all. Both are treated as
/// a rejected event by the validator.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, id: &str, pubkey: &str, sig: &str) -> Result<bool, String>;
}

/// BIP-340 Schnorr verification over secp256k1 (NIP-01 signatures).
pub struct SchnorrVerifier {
    secp: Secp256k1<VerifyOnly>,
}

impl SchnorrVerifier {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl Default for SchnorrVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for SchnorrVerifier {
    fn verify(&self, id: &str, pubkey: &str, sig: &str) -> Result<bool, String> {
        let id_bytes = hex::decode(id).map_err(|e| format!("invalid id hex: {}", e))?;
        let message =
            Message::from_slice(&id_bytes).map_err(|e| format!("invalid message: {}", e))?;

        let sig_bytes = hex::decode(sig).map_err(|e| format!("invalid sig hex: {}", e))?;
        let signature = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| format!("invalid signature: {}", e))?;

        let pubkey_bytes =
            hex::decode(pubkey).map_err(|e| format!("invalid pubkey hex: {}", e))?;
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
            .map_err(|e| format!("invalid pubkey: {}", e))?;

        Ok(self
            .secp
            .verify_schnorr(&signature, &message, &pubkey)
            .is_ok())
    }
}
