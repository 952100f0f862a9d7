use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::SubmitError,
    ledger::models::Amount,
    wallet::{keypair, Keypair},
};

/// One account-creation request as it travels through queue and batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadyAccountRequest {
    pub target: String,
    pub balance: Amount,
}

impl ReadyAccountRequest {
    pub fn new(target: impl Into<String>, balance: Amount) -> Self {
        Self {
            target: target.into(),
            balance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    CreateAccount { target: String, amount: Amount },
}

/// Unsigned transaction body. Field order is the canonical hashing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub source: String,
    pub sequence_number: u64,
    pub fee: Amount,
    pub operations: Vec<Operation>,
    pub created: DateTime<Utc>,
}

impl TransactionBody {
    pub fn create_accounts(
        source: &str,
        sequence_number: u64,
        base_fee: Amount,
        requests: &[ReadyAccountRequest],
    ) -> Result<Self, SubmitError> {
        if requests.is_empty() {
            return Err(SubmitError::Build("transaction has no operations".into()));
        }

        let fee = base_fee
            .checked_mul(requests.len() as u64)
            .ok_or_else(|| SubmitError::Build("fee overflow".into()))?;

        let operations = requests
            .iter()
            .map(|r| Operation::CreateAccount {
                target: r.target.clone(),
                amount: r.balance,
            })
            .collect();

        Ok(Self {
            source: source.to_string(),
            sequence_number,
            fee,
            operations,
            created: Utc::now(),
        })
    }

    /// Hex sha256 of the canonical JSON encoding.
    pub fn hash(&self) -> Result<String, SubmitError> {
        let encoded = serde_json::to_vec(self).map_err(|e| SubmitError::Build(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }

    pub fn sign(self, keypair: &Keypair, network_id: &[u8]) -> Result<TransactionEnvelope, SubmitError> {
        if keypair.address() != self.source {
            return Err(SubmitError::Build(format!(
                "signer {} is not the transaction source {}",
                keypair.address(),
                self.source
            )));
        }

        let hash = self.hash()?;
        let message = signing_message(network_id, &hash)?;
        let signature = keypair.sign(&message);

        Ok(TransactionEnvelope {
            hash,
            body: self,
            signer: keypair.address().to_string(),
            signature: hex::encode(signature),
        })
    }
}

/// Signed transaction as submitted to the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub hash: String,
    pub body: TransactionBody,
    pub signer: String,
    pub signature: String,
}

impl TransactionEnvelope {
    pub fn targets(&self) -> impl Iterator<Item = (&str, Amount)> {
        self.body.operations.iter().map(|op| match op {
            Operation::CreateAccount { target, amount } => (target.as_str(), *amount),
        })
    }

    /// Recompute the hash and check the signature against the declared signer.
    pub fn verify(&self, network_id: &[u8]) -> bool {
        let Ok(hash) = self.body.hash() else {
            return false;
        };
        if hash != self.hash || self.signer != self.body.source {
            return false;
        }
        let Ok(message) = signing_message(network_id, &hash) else {
            return false;
        };
        let Ok(signature) = hex::decode(&self.signature) else {
            return false;
        };
        keypair::verify(&self.signer, &message, &signature)
    }
}

fn signing_message(network_id: &[u8], hash: &str) -> Result<Vec<u8>, SubmitError> {
    let hash_bytes = hex::decode(hash).map_err(|e| SubmitError::Build(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(network_id);
    hasher.update(&hash_bytes);
    Ok(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requests(n: usize) -> Vec<ReadyAccountRequest> {
        (0..n)
            .map(|_| ReadyAccountRequest::new(Keypair::random().address(), Amount(500)))
            .collect()
    }

    #[test]
    fn test_fee_scales_with_operations() {
        let kp = Keypair::random();
        let body = TransactionBody::create_accounts(kp.address(), 4, Amount(10_000), &requests(3)).unwrap();
        assert_eq!(body.fee, Amount(30_000));
        assert_eq!(body.operations.len(), 3);
        assert_eq!(body.sequence_number, 4);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let kp = Keypair::random();
        assert!(TransactionBody::create_accounts(kp.address(), 0, Amount(1), &[]).is_err());
    }

    #[test]
    fn test_hash_is_stable_and_content_addressed() {
        let kp = Keypair::random();
        let body = TransactionBody::create_accounts(kp.address(), 1, Amount(1), &requests(2)).unwrap();
        assert_eq!(body.hash().unwrap(), body.clone().hash().unwrap());

        let mut bumped = body.clone();
        bumped.sequence_number += 1;
        assert_ne!(body.hash().unwrap(), bumped.hash().unwrap());
    }

    #[test]
    fn test_signature_is_bound_to_network() {
        let kp = Keypair::random();
        let body = TransactionBody::create_accounts(kp.address(), 1, Amount(1), &requests(1)).unwrap();
        let envelope = body.sign(&kp, b"test-network").unwrap();

        assert!(envelope.verify(b"test-network"));
        assert!(!envelope.verify(b"other-network"));
    }

    #[test]
    fn test_tampered_body_fails_verification() {
        let kp = Keypair::random();
        let body = TransactionBody::create_accounts(kp.address(), 1, Amount(1), &requests(1)).unwrap();
        let mut envelope = body.sign(&kp, b"net").unwrap();
        envelope.body.fee = Amount(0);
        assert!(!envelope.verify(b"net"));
    }

    #[test]
    fn test_sign_requires_source_key() {
        let kp = Keypair::random();
        let other = Keypair::random();
        let body = TransactionBody::create_accounts(kp.address(), 1, Amount(1), &requests(1)).unwrap();
        assert!(body.sign(&other, b"net").is_err());
    }
}
