//! EIP-712 typed-data hashing for x402 payment contexts

use ethers::abi::{self, Token};
use ethers::signers::LocalWallet;
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use paygate_types::PaymentContext;

pub const DOMAIN_NAME: &str = "MicroAI Paygate";
pub const DOMAIN_VERSION: &str = "1";

const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const PAYMENT_TYPE: &[u8] =
    b"Payment(address recipient,string token,string amount,string nonce,uint256 timestamp)";

/// EIP-712 domain for paygate payments. The verifying contract is a zero
/// placeholder since nothing is settled on-chain.
pub struct PaymentDomain {
    name: String,
    version: String,
    chain_id: u64,
    verifying_contract: Address,
}

impl PaymentDomain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            name: DOMAIN_NAME.to_string(),
            version: DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract: Address::zero(),
        }
    }

    pub fn separator(&self) -> H256 {
        let encoded = abi::encode(&[
            Token::FixedBytes(keccak256(DOMAIN_TYPE).to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.verifying_contract),
        ]);

        H256::from(keccak256(&encoded))
    }
}

/// The `Payment` message a wallet signs.
pub struct PaymentMessage {
    recipient: Address,
    token: String,
    amount: String,
    nonce: String,
    timestamp: U256,
}

impl PaymentMessage {
    /// Build the message from a context. The timestamp must already be known
    /// to be present; a missing one hashes as zero.
    pub fn from_context(ctx: &PaymentContext) -> Result<Self, String> {
        let recipient: Address = ctx
            .recipient
            .parse()
            .map_err(|e| format!("Invalid recipient address '{}': {}", ctx.recipient, e))?;

        Ok(Self {
            recipient,
            token: ctx.token.clone(),
            amount: ctx.amount.clone(),
            nonce: ctx.nonce.clone(),
            timestamp: U256::from(ctx.timestamp.unwrap_or(0)),
        })
    }

    pub fn struct_hash(&self) -> H256 {
        // Dynamic `string` members are encoded as the keccak of their bytes
        let encoded = abi::encode(&[
            Token::FixedBytes(keccak256(PAYMENT_TYPE).to_vec()),
            Token::Address(self.recipient),
            Token::FixedBytes(keccak256(self.token.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.amount.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.nonce.as_bytes()).to_vec()),
            Token::Uint(self.timestamp),
        ]);

        H256::from(keccak256(&encoded))
    }
}

/// Final digest: keccak256("\x19\x01" ++ domainSeparator ++ structHash)
pub fn payment_digest(ctx: &PaymentContext) -> Result<H256, String> {
    let domain = PaymentDomain::new(ctx.chain_id);
    let message = PaymentMessage::from_context(ctx)?;

    let mut to_sign = Vec::with_capacity(66);
    to_sign.push(0x19);
    to_sign.push(0x01);
    to_sign.extend_from_slice(domain.separator().as_bytes());
    to_sign.extend_from_slice(message.struct_hash().as_bytes());

    Ok(H256::from(keccak256(&to_sign)))
}

/// Sign a payment context the way a wallet would, returning `0x`-prefixed
/// hex of the 65-byte r ‖ s ‖ v signature.
pub fn sign_context(wallet: &LocalWallet, ctx: &PaymentContext) -> Result<String, String> {
    let digest = payment_digest(ctx)?;
    let signature = wallet
        .sign_hash(digest)
        .map_err(|e| format!("Failed to sign: {}", e))?;
    Ok(format!("0x{}", hex::encode(signature.to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::transaction::eip712::{Eip712, TypedData};

    fn context(ts: u64) -> PaymentContext {
        PaymentContext {
            recipient: "0x1234567890123456789012345678901234567890".into(),
            token: "USDC".into(),
            amount: "100".into(),
            nonce: "nonce-1".into(),
            chain_id: 1,
            timestamp: Some(ts),
        }
    }

    #[test]
    fn test_digest_matches_ethers_typed_data() {
        let ts = 1_700_000_000u64;
        let typed: TypedData = serde_json::from_value(serde_json::json!({
            "domain": {
                "name": "MicroAI Paygate",
                "version": "1",
                "chainId": 1,
                "verifyingContract": "0x0000000000000000000000000000000000000000"
            },
            "types": {
                "Payment": [
                    { "name": "recipient", "type": "address" },
                    { "name": "token", "type": "string" },
                    { "name": "amount", "type": "string" },
                    { "name": "nonce", "type": "string" },
                    { "name": "timestamp", "type": "uint256" }
                ]
            },
            "primaryType": "Payment",
            "message": {
                "recipient": "0x1234567890123456789012345678901234567890",
                "token": "USDC",
                "amount": "100",
                "nonce": "nonce-1",
                "timestamp": ts
            }
        }))
        .unwrap();

        let expected = typed.encode_eip712().unwrap();
        let actual = payment_digest(&context(ts)).unwrap();
        assert_eq!(actual.as_bytes(), &expected[..]);
    }

    #[test]
    fn test_domain_separator_depends_on_chain() {
        assert_ne!(PaymentDomain::new(1).separator(), PaymentDomain::new(8453).separator());
    }

    #[test]
    fn test_invalid_recipient_is_rejected() {
        let mut ctx = context(1);
        ctx.recipient = "not-an-address".into();
        assert!(payment_digest(&ctx).is_err());
    }

    #[test]
    fn test_sign_context_is_65_bytes() {
        let wallet: LocalWallet = "380eb0f3d505f087e438eca80bc4df9a7faa24f868e69fc0440261a0fc0567dc"
            .parse()
            .unwrap();
        let sig = sign_context(&wallet, &context(1)).unwrap();
        let bytes = hex::decode(sig.strip_prefix("0x").unwrap()).unwrap();
        assert_eq!(bytes.len(), 65);
    }
}
