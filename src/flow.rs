use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, thread};

use bitcoin::hex::DisplayHex;
use bitcoincore_rpc::bitcoin::address::NetworkUnchecked;
use bitcoincore_rpc::bitcoin::{Address, Amount, Txid};
use bitcoincore_rpc::json::{AddressType, CreateRawTransactionInput};
use bitcoincore_rpc::{Client, RpcApi};
use serde::Deserialize;
use serde_json::json;

use crate::amount::{AmountProvider, TRANSFER_FEE, request_amount};
use crate::error::TransferError;
use crate::node::NodeConfig;

/// Parameters distinguishing one demo flow from another. The legacy and
/// segwit flows share the same step sequence and differ only in these.
#[derive(Clone)]
pub struct FlowSpec {
    pub wallet: &'static str,
    pub address_type: AddressType,
    /// Labels to resolve or create, in order. Transfers chain down the list
    /// starting from the first (funded) label.
    pub labels: Vec<&'static str>,
    /// Number of chained transfers to perform.
    pub hops: usize,
    /// Blocks to mine to the first label's address before transferring.
    pub funding_blocks: u64,
    /// Delete the wallet's on-disk directory after unloading it.
    pub purge_wallet_dir: bool,
}

/// A script extracted from a decoded transaction: its hex and byte size.
pub struct ScriptSummary {
    pub hex: String,
    pub size: usize,
}

/// What one broadcast transfer produced.
pub struct TransferOutcome {
    pub txid: Txid,
    pub sent: Amount,
    pub change: Amount,
    pub vsize: u32,
    pub script_pubkey: ScriptSummary,
    pub script_sig: Option<ScriptSummary>,
}

/// Result of one full flow run, including the cleanup bookkeeping.
pub struct FlowReport {
    pub transfers: Vec<TransferOutcome>,
    pub error: Option<TransferError>,
    pub reconnect_attempts: u32,
    pub unload_attempted: bool,
}

/// Sequences the RPC calls for one flow: wallet setup, address resolution,
/// funding, chained transfers, and cleanup. Owns its client config and its
/// amount source so nothing here touches global state.
pub struct Orchestrator<P: AmountProvider> {
    node: NodeConfig,
    spec: FlowSpec,
    amounts: P,
    retry_delay: Duration,
}

impl<P: AmountProvider> Orchestrator<P> {
    pub fn new(node: NodeConfig, spec: FlowSpec, amounts: P) -> Self {
        Self {
            node,
            spec,
            amounts,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Run the flow to completion. Any RPC failure is printed, followed by
    /// one reconnect attempt, and the flow is abandoned; the failed call is
    /// never retried. The wallet unload runs exactly once either way, and
    /// its failure is reported but never re-raised.
    pub fn run(&mut self) -> FlowReport {
        let mut report = FlowReport {
            transfers: Vec::new(),
            error: None,
            reconnect_attempts: 0,
            unload_attempted: false,
        };

        if let Err(err) = self.execute(&mut report.transfers) {
            println!("Error: {err}. Reconnecting...");
            thread::sleep(self.retry_delay);
            report.reconnect_attempts += 1;
            if let Err(fatal) = self.node.root_client() {
                println!("Fatal error: {fatal}");
            }
            report.error = Some(err);
        }

        report.unload_attempted = true;
        match self
            .node
            .root_client()
            .and_then(|root| root.unload_wallet(Some(self.spec.wallet)))
        {
            Ok(_) => println!("\nUnloaded wallet: {}", self.spec.wallet),
            Err(unload_err) => println!("Error unloading wallet: {unload_err}"),
        }
        if self.spec.purge_wallet_dir {
            self.purge_wallet_dir();
        }

        report
    }

    fn execute(&mut self, transfers: &mut Vec<TransferOutcome>) -> Result<(), TransferError> {
        let root = self.node.root_client()?;

        let wallet_name = self.spec.wallet;
        if root.list_wallets()?.iter().any(|w| w == wallet_name) {
            println!("Wallet '{wallet_name}' is already loaded.");
        } else if root.load_wallet(wallet_name).is_ok() {
            println!("Loaded wallet: {wallet_name}");
        } else {
            root.create_wallet(wallet_name, None, None, None, None)?;
            println!("Created wallet: {wallet_name}");
        }

        let wallet = self.node.wallet_client(wallet_name)?;

        let labels = self.spec.labels.clone();
        let mut addresses = Vec::with_capacity(labels.len());
        println!("\nAddresses:");
        for label in &labels {
            let address = resolve_address(&wallet, label, self.spec.address_type.clone())?;
            println!("{label}: {address}");
            addresses.push(address);
        }

        let funded = &addresses[0];
        if self.spec.funding_blocks > 0 {
            println!(
                "\nMining {} blocks to fund {} ...",
                self.spec.funding_blocks, labels[0]
            );
            wallet.generate_to_address(self.spec.funding_blocks, funded)?;
        }
        let balance = wallet.get_balance(None, None)?;
        println!("Balance of {}: {} BTC", labels[0], balance.to_btc());

        let hops = self.spec.hops.min(labels.len().saturating_sub(1));
        for hop in 0..hops {
            let outcome = self.transfer(
                &wallet,
                &addresses[hop],
                &addresses[hop + 1],
                (labels[hop], labels[hop + 1]),
            )?;
            transfers.push(outcome);
            if hop + 1 < hops {
                // Confirm the spend so the next hop's listunspent sees its
                // output as a mature UTXO.
                wallet.generate_to_address(1, funded)?;
            }
        }
        Ok(())
    }

    /// One transfer: select the sender's first UTXO, prompt for an amount,
    /// build, inspect, sign, and broadcast the raw transaction. Change goes
    /// back to the sender; a zero change output is omitted entirely since
    /// the node would reject it as dust.
    fn transfer(
        &mut self,
        wallet: &Client,
        sender: &Address,
        receiver: &Address,
        pair: (&str, &str),
    ) -> Result<TransferOutcome, TransferError> {
        let (from, to) = pair;

        println!("\nRetrieving UTXOs for {from} ...");
        let utxos = wallet.list_unspent(Some(1), Some(9_999_999), Some(&[sender]), None, None)?;
        let Some(utxo) = utxos.into_iter().next() else {
            return Err(TransferError::NoSpendableUtxo {
                address: sender.to_string(),
            });
        };
        println!(
            "UTXO of {from}:\nTXID: {}\nVout: {}\nAmount: {} BTC",
            utxo.txid,
            utxo.vout,
            utxo.amount.to_btc()
        );

        let available = utxo
            .amount
            .checked_sub(TRANSFER_FEE)
            .ok_or(TransferError::UtxoBelowFee {
                amount: utxo.amount,
                fee: TRANSFER_FEE,
            })?;
        let send_amount = request_amount(&mut self.amounts, available, (from, to))?;
        // Validation guarantees send_amount <= available, so no underflow.
        let change = available - send_amount;

        println!("\nCreating raw transaction from {from} to {to} ...");
        let inputs = [CreateRawTransactionInput {
            txid: utxo.txid,
            vout: utxo.vout,
            sequence: None,
        }];
        let outputs = plan_outputs(&receiver.to_string(), &sender.to_string(), send_amount, change);
        let raw_hex = wallet.create_raw_transaction_hex(&inputs, &outputs, None, None)?;
        println!("Unsigned raw transaction hex:\n{raw_hex}");

        println!("\nDecoding transaction {from} -> {to} to extract the challenge script ...");
        let decoded = wallet.decode_raw_transaction(raw_hex.as_str(), None)?;
        let first_out = decoded.vout.first().ok_or(TransferError::NoDecodedOutputs)?;
        let script_pubkey = ScriptSummary {
            hex: first_out.script_pub_key.hex.to_lower_hex_string(),
            size: first_out.script_pub_key.hex.len(),
        };
        println!("Extracted ScriptPubKey: {}", script_pubkey.hex);
        println!("Script size: {} bytes", script_pubkey.size);

        println!("\nSigning transaction {from} -> {to} ...");
        let signed = wallet.sign_raw_transaction_with_wallet(raw_hex.as_str(), None, None)?;
        if !signed.complete {
            return Err(TransferError::IncompleteSignature);
        }
        let signed_hex = signed.hex.to_lower_hex_string();
        println!("Signed transaction hex:\n{signed_hex}");

        println!("\nBroadcasting transaction {from} -> {to} ...");
        let txid = wallet.send_raw_transaction(signed_hex.as_str())?;
        let decoded_signed = wallet.decode_raw_transaction(signed_hex.as_str(), Some(true))?;
        println!("\nTransaction ID ({from} -> {to}): {txid}");
        println!("Transaction size: {} vbytes", decoded_signed.vsize);

        let script_sig = decoded_signed
            .vin
            .first()
            .and_then(|vin| vin.script_sig.as_ref())
            .map(|sig| ScriptSummary {
                hex: sig.hex.to_lower_hex_string(),
                size: sig.hex.len(),
            });
        if let Some(sig) = &script_sig {
            println!("Extracted ScriptSig: {}", sig.hex);
            println!("Script size: {} bytes", sig.size);
        }

        Ok(TransferOutcome {
            txid,
            sent: send_amount,
            change,
            vsize: decoded_signed.vsize,
            script_pubkey,
            script_sig,
        })
    }

    fn purge_wallet_dir(&self) {
        let Some(dir) = wallet_data_dir(self.spec.wallet) else {
            return;
        };
        if dir.exists() {
            match fs::remove_dir_all(&dir) {
                Ok(()) => println!("Removed wallet directory: {}", dir.display()),
                Err(err) => {
                    println!("Error removing wallet directory {}: {err}", dir.display());
                }
            }
        }
    }
}

/// The recipient gets the requested amount; change returns to the sender
/// unless it is zero. Outputs therefore always sum to `input - fee`.
fn plan_outputs(
    receiver: &str,
    sender: &str,
    send_amount: Amount,
    change: Amount,
) -> HashMap<String, Amount> {
    let mut outputs = HashMap::with_capacity(2);
    outputs.insert(receiver.to_owned(), send_amount);
    if change > Amount::ZERO {
        outputs.insert(sender.to_owned(), change);
    }
    outputs
}

/// Reuse the first address already filed under `label`, otherwise ask the
/// node for a fresh one of the requested script type.
fn resolve_address(
    wallet: &Client,
    label: &str,
    address_type: AddressType,
) -> Result<Address, TransferError> {
    #[derive(Deserialize)]
    struct LabelEntry {
        purpose: String,
    }

    // getaddressesbylabel has no exposed API in the RPC lib; use the
    // generic call. It errors when no address carries the label yet.
    let existing: Result<HashMap<String, LabelEntry>, _> =
        wallet.call("getaddressesbylabel", &[json!(label)]);
    if let Ok(entries) = existing {
        if let Some((addr, entry)) = entries.into_iter().next() {
            println!("Reusing {} address for label '{label}'", entry.purpose);
            let address: Address<NetworkUnchecked> = addr.parse()?;
            return Ok(address.assume_checked());
        }
    }
    Ok(wallet
        .get_new_address(Some(label), Some(address_type))?
        .assume_checked())
}

/// Bitcoin Core keeps regtest wallets under the platform data directory;
/// mirror the node's layout so cleanup removes the right files.
fn wallet_data_dir(wallet: &str) -> Option<PathBuf> {
    let base = if cfg!(windows) {
        env::var_os("APPDATA").map(PathBuf::from)?.join("Bitcoin")
    } else {
        env::var_os("HOME").map(PathBuf::from)?.join(".bitcoin")
    };
    Some(base.join("regtest").join("wallets").join(wallet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::ScriptedAmounts;

    fn btc(value: f64) -> Amount {
        Amount::from_btc(value).unwrap()
    }

    #[test]
    fn outputs_sum_to_input_minus_fee() {
        let utxo_amount = btc(50.0);
        let send_amount = btc(10.0);
        let change = utxo_amount - send_amount - TRANSFER_FEE;

        let outputs = plan_outputs("receiver", "sender", send_amount, change);
        assert_eq!(outputs["receiver"], btc(10.0));
        assert_eq!(outputs["sender"], btc(39.9999));

        let total: Amount = outputs.values().copied().sum();
        assert_eq!(total, utxo_amount - TRANSFER_FEE);
    }

    #[test]
    fn zero_change_output_is_omitted() {
        let outputs = plan_outputs("receiver", "sender", btc(1.0), Amount::ZERO);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["receiver"], btc(1.0));
    }

    #[test]
    fn full_balance_spend_keeps_output_sum_intact() {
        let utxo_amount = btc(50.0);
        let available = utxo_amount - TRANSFER_FEE;

        let outputs = plan_outputs("receiver", "sender", available, Amount::ZERO);
        let total: Amount = outputs.values().copied().sum();
        assert_eq!(total, utxo_amount - TRANSFER_FEE);
    }

    #[test]
    fn unreachable_node_reconnects_once_and_unloads_once() {
        // Port 1 on loopback refuses connections, so the first RPC fails.
        let node = NodeConfig::new("http://127.0.0.1:1", "admin", "admin");
        let spec = FlowSpec {
            wallet: "Test_Unreachable",
            address_type: AddressType::Legacy,
            labels: vec!["Sender", "Receiver"],
            hops: 1,
            funding_blocks: 0,
            purge_wallet_dir: false,
        };
        let mut orchestrator = Orchestrator::new(node, spec, ScriptedAmounts::new(["1"]));
        orchestrator.retry_delay = Duration::ZERO;

        let report = orchestrator.run();
        assert!(report.error.is_some());
        assert!(report.transfers.is_empty());
        assert_eq!(report.reconnect_attempts, 1);
        assert!(report.unload_attempted);
    }

    #[test]
    fn wallet_data_dir_targets_regtest_wallets() {
        let Some(dir) = wallet_data_dir("Synergy_SegWit") else {
            // No home directory in this environment; nothing to check.
            return;
        };
        let path = dir.to_string_lossy().into_owned();
        assert!(path.ends_with("regtest/wallets/Synergy_SegWit") || path.contains("Bitcoin"));
    }
}
