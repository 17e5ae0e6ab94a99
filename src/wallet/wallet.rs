use crate::core::SignedTransaction;
use crate::error::Result;
use crate::utils::{encode_address, generate_keypair, public_key_from_pkcs8, PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Clone, Zeroize, ZeroizeOnDrop, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    #[zeroize(skip)]
    public_key: PublicKey,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let (public_key, pkcs8) = generate_keypair()?;
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Wallet> {
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn address(&self) -> String {
        encode_address(&self.public_key)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn sign(&self, trx: &mut SignedTransaction) -> Result<()> {
        trx.sign(&self.pkcs8)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Command, Transaction};
    use crate::utils::validate_address_format;

    #[test]
    fn test_wallet_signs_for_its_key() {
        let wallet = Wallet::new().unwrap();
        assert!(validate_address_format(&wallet.address()));

        let trx = Transaction::new(vec![Command::Issue {
            stock_name: "acme".to_string(),
        }])
        .unwrap();
        let mut signed = SignedTransaction::new(trx);
        wallet.sign(&mut signed).unwrap();
        assert!(signed.verify(wallet.public_key()));
        assert!(!signed.verify(Wallet::new().unwrap().public_key()));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let wallet = Wallet::new().unwrap();
        let shown = format!("{wallet:?}");
        assert!(shown.contains(&wallet.address()));
        assert!(!shown.contains("pkcs8"));
    }
}
