use bitcoincore_rpc::bitcoin::Amount;
use thiserror::Error;

/// Failures surfaced by the orchestration flow. RPC and connectivity
/// problems abort the flow after a single reconnect attempt; input
/// validation errors never reach this type because the prompt loop
/// re-prompts instead.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("rpc failure: {0}")]
    Rpc(#[from] bitcoincore_rpc::Error),

    #[error("node returned an unparseable address: {0}")]
    BadAddress(#[from] bitcoincore_rpc::bitcoin::address::ParseError),

    #[error("no spendable UTXO for address {address}")]
    NoSpendableUtxo { address: String },

    #[error("UTXO of {amount} does not cover the {fee} fee")]
    UtxoBelowFee { amount: Amount, fee: Amount },

    #[error("amount input ended before a valid amount was entered")]
    AmountInputClosed,

    #[error("decoded transaction has no outputs")]
    NoDecodedOutputs,

    #[error("wallet could not produce a complete signature")]
    IncompleteSignature,
}
