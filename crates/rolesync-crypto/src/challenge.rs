//! Challenge texts.
//!
//! The text is never sent back with the signature; the verifier rebuilds it
//! from the stored nonce, so these functions must stay byte-for-byte stable.

/// Text a principal signs to link a wallet.
pub fn link_message(nonce: &str) -> String {
    format!("Verify your wallet for AccessTime Discord Bot\nNonce: {nonce}")
}

/// Text the contract owner signs to prove control of a tenant's contract.
pub fn ownership_message(project_id: &str, chain_id: u64, nonce: &str) -> String {
    format!(
        "Verify your wallet for AccessTime Discord Bot Ownership Verify\nProjectId: {project_id}\nChainId: {chain_id}\nNonce: {nonce}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_message_is_stable() {
        assert_eq!(
            link_message("abcd"),
            "Verify your wallet for AccessTime Discord Bot\nNonce: abcd"
        );
    }

    #[test]
    fn test_ownership_message_embeds_contract() {
        let msg = ownership_message("12", 8453, "ff00");
        assert_eq!(
            msg,
            "Verify your wallet for AccessTime Discord Bot Ownership Verify\nProjectId: 12\nChainId: 8453\nNonce: ff00"
        );
        assert_ne!(msg, ownership_message("12", 1, "ff00"));
    }
}
