// This file defines what a transaction is in my ledger
// A transaction here is a list of commands against named accounts, not coins
// Every command in a transaction applies, or none of them do

use crate::error::{ChainError, Result};
use crate::utils::{current_timestamp, deserialize, hash, serialize, sign, verify};
use crate::utils::{Digest, PublicKey, Signature};
use serde::{Deserialize, Serialize};

// These are the only things a transaction can ask the ledger to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Command {
    // Claim a name (or hand it to a new key if I can sign for the current one)
    RegisterName {
        name: String,
        public_key: PublicKey,
    },
    // Create a stock named after an account; the account starts holding all of it
    Issue {
        stock_name: String,
    },
    // Move units of a stock between accounts; an empty `to_name` pays the block generator
    Transfer {
        amount: u64,
        stock_name: String,
        from_name: String,
        to_name: String,
    },
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::RegisterName { .. } => "register_name",
            Command::Issue { .. } => "issue",
            Command::Transfer { .. } => "transfer",
        }
    }
}

// The unsigned part - this is what signatures cover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    pub utc_time: u64, // milliseconds since the epoch when I built it
    pub commands: Vec<Command>,
}

impl Transaction {
    pub fn new(commands: Vec<Command>) -> Result<Transaction> {
        if commands.is_empty() {
            return Err(ChainError::Transaction(
                "Transaction must contain at least one command".to_string(),
            ));
        }
        let utc_time = u64::try_from(current_timestamp()?)
            .map_err(|_| ChainError::Transaction("Negative timestamp".to_string()))?;
        Ok(Transaction { utc_time, commands })
    }

    // I hash the serialized transaction; this is the digest every signature signs
    pub fn digest(&self) -> Result<Digest> {
        Ok(hash(&serialize(self)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<Signature>,
}

impl SignedTransaction {
    pub fn new(transaction: Transaction) -> SignedTransaction {
        SignedTransaction {
            transaction,
            signatures: vec![],
        }
    }

    // A transaction that touches several accounts may need several signers
    pub fn sign(&mut self, pkcs8: &[u8]) -> Result<()> {
        let digest = self.transaction.digest()?;
        self.signatures.push(sign(pkcs8, &digest)?);
        Ok(())
    }

    // True if any of the attached signatures was made by this key
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        let digest = match self.transaction.digest() {
            Ok(digest) => digest,
            Err(_) => return false,
        };
        self.signatures
            .iter()
            .any(|signature| verify(public_key, &digest, signature))
    }

    // Identity in the transaction pool, covers the signatures too
    pub fn digest(&self) -> Result<Digest> {
        Ok(hash(&self.serialize()?))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<SignedTransaction> {
        deserialize(bytes)
    }
}
