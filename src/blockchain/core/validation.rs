use crate::blockchain::core::chain::Block;
use crate::error::{ChainError, Result};

/// Checks `block` against the tip it claims to extend. Rules run in a fixed
/// order and stop at the first failure:
///
/// 1. height is exactly one above the tip
/// 2. `prev_digest` equals the tip's digest
/// 3. producer is the scheduled authority for this height
/// 4. authority signature verifies over the digest
/// 5. content digest matches the included transactions
/// 6. header digest matches the header fields
/// 7. every included transaction carries a valid sender signature
pub fn check_block(block: &Block, tip: &Block, expected_authority: Option<&str>) -> Result<()> {
    if block.height != tip.height + 1 {
        return Err(ChainError::Validation(format!(
            "Invalid block height. Expected {}, but got {}.",
            tip.height + 1,
            block.height
        )));
    }

    if block.prev_digest != tip.digest {
        return Err(ChainError::Validation(format!(
            "Invalid previous block digest. Expected {}, but got {}.",
            tip.digest, block.prev_digest
        )));
    }

    if expected_authority != Some(block.authority_pubkey.as_str()) {
        return Err(ChainError::Authorization(format!(
            "Block {} produced by an authority not scheduled for this height",
            block.height
        )));
    }

    if !block.has_valid_signature() {
        return Err(ChainError::Validation(
            "Invalid authority signature".to_string(),
        ));
    }

    let content_digest = block.recompute_content_digest();
    if content_digest != block.content_digest {
        return Err(ChainError::Validation(format!(
            "Content digest mismatch. Expected {}, but got {}.",
            content_digest, block.content_digest
        )));
    }

    if block.recompute_digest()? != block.digest {
        return Err(ChainError::Validation(
            "Block digest does not match its header".to_string(),
        ));
    }

    if let Some(tx) = block.transactions.iter().find(|tx| !tx.is_valid()) {
        return Err(ChainError::Validation(format!(
            "Transaction {} in block {} is not validly signed",
            tx.tx_id, block.height
        )));
    }

    Ok(())
}
