//! Drives a Bitcoin Core regtest node over JSON-RPC to demonstrate legacy
//! (P2PKH) and P2SH-wrapped SegWit transfer flows: wallet setup, labeled
//! address generation, mining for funds, manual raw-transaction
//! construction with change math, script inspection, wallet signing, and
//! broadcast. All key management, signing, and consensus validation happen
//! inside the node; this binary only sequences the RPC calls.

mod amount;
mod error;
mod flow;
mod node;

use bitcoincore_rpc::json::AddressType;

use crate::amount::StdinAmounts;
use crate::flow::{FlowSpec, Orchestrator};
use crate::node::NodeConfig;

// Node access params
const RPC_URL: &str = "http://127.0.0.1:18443"; // Default regtest RPC port
const RPC_USER: &str = "admin";
const RPC_PASS: &str = "admin";

fn main() {
    let node = NodeConfig::new(RPC_URL, RPC_USER, RPC_PASS);

    // One parameterized flow covers both demos: a single legacy hop from
    // Sender to Receiver, and a chained segwit run X -> Y -> Z.
    let legacy = FlowSpec {
        wallet: "Synergy_Legacy",
        address_type: AddressType::Legacy,
        // A Change address is filed under its own label, but change from the
        // transfer itself returns to the Sender address.
        labels: vec!["Sender", "Receiver", "Change"],
        hops: 1,
        funding_blocks: 101,
        purge_wallet_dir: false,
    };
    let segwit = FlowSpec {
        wallet: "Synergy_SegWit",
        address_type: AddressType::P2shSegwit,
        labels: vec!["X", "Y", "Z"],
        hops: 2,
        funding_blocks: 101,
        purge_wallet_dir: true,
    };

    for spec in [legacy, segwit] {
        let wallet = spec.wallet;
        println!("\n==== Wallet: {wallet} ====");

        let mut orchestrator = Orchestrator::new(node.clone(), spec, StdinAmounts);
        let report = orchestrator.run();

        for outcome in &report.transfers {
            let script_sig_note = match &outcome.script_sig {
                Some(sig) => format!(", scriptSig {} bytes", sig.size),
                None => String::new(),
            };
            println!(
                "Completed {}: sent {} BTC, change {} BTC, {} vbytes, scriptPubKey {} bytes{script_sig_note}",
                outcome.txid,
                outcome.sent.to_btc(),
                outcome.change.to_btc(),
                outcome.vsize,
                outcome.script_pubkey.size,
            );
        }
        if report.error.is_some() {
            println!(
                "Flow for wallet '{wallet}' did not complete (reconnects attempted: {}).",
                report.reconnect_attempts
            );
        }
    }
}
