use std::collections::VecDeque;
use std::io::{self, Write};

use bitcoincore_rpc::bitcoin::{Amount, Denomination};

use crate::error::TransferError;

/// Flat fee subtracted from every transfer. Well above the regtest minimum
/// relay fee, so the node never rejects for underpaying.
pub const TRANSFER_FEE: Amount = Amount::from_sat(10_000);

/// Source of transfer amounts. Keeping this behind a trait lets tests drive
/// the flow without blocking on a terminal.
pub trait AmountProvider {
    /// Next raw input line, or `None` once the source is exhausted.
    fn read_amount(&mut self, prompt: &str) -> Option<String>;
}

/// Interactive provider reading lines from stdin.
pub struct StdinAmounts;

impl AmountProvider for StdinAmounts {
    fn read_amount(&mut self, prompt: &str) -> Option<String> {
        print!("{prompt}");
        io::stdout().flush().ok()?;
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }
}

/// Pre-queued provider for scripted runs and tests.
pub struct ScriptedAmounts {
    queue: VecDeque<String>,
}

impl ScriptedAmounts {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: inputs.into_iter().map(Into::into).collect(),
        }
    }
}

impl AmountProvider for ScriptedAmounts {
    fn read_amount(&mut self, _prompt: &str) -> Option<String> {
        self.queue.pop_front()
    }
}

/// Prompt until the provider yields an amount in `(0, max]`. Invalid
/// entries re-prompt indefinitely; an exhausted provider aborts the flow.
pub fn request_amount<P: AmountProvider>(
    provider: &mut P,
    max: Amount,
    pair: (&str, &str),
) -> Result<Amount, TransferError> {
    let (from, to) = pair;
    let prompt = format!(
        "\nEnter the amount to send from {from} to {to} (max {} BTC): ",
        max.to_btc()
    );
    loop {
        let line = provider
            .read_amount(&prompt)
            .ok_or(TransferError::AmountInputClosed)?;
        let entry = line.trim();
        let amount = match Amount::from_str_in(entry, Denomination::Bitcoin) {
            Ok(amount) => amount,
            // Amount is unsigned, so negative entries fail to parse; report
            // them as out of range rather than non-numeric.
            Err(_) if entry.parse::<f64>().is_ok() => {
                println!("Error: Amount must be greater than 0.");
                continue;
            }
            Err(_) => {
                println!("Error: Invalid amount. Please enter a numeric value.");
                continue;
            }
        };
        if amount == Amount::ZERO {
            println!("Error: Amount must be greater than 0.");
        } else if amount > max {
            println!("Error: Amount cannot exceed {} BTC.", max.to_btc());
        } else {
            return Ok(amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc(value: f64) -> Amount {
        Amount::from_btc(value).unwrap()
    }

    #[test]
    fn accepts_amount_within_range() {
        let mut amounts = ScriptedAmounts::new(["10"]);
        let accepted = request_amount(&mut amounts, btc(49.9999), ("Sender", "Receiver"));
        assert_eq!(accepted.unwrap(), btc(10.0));
    }

    #[test]
    fn rejects_zero_and_over_max_then_accepts() {
        let mut amounts = ScriptedAmounts::new(["0", "60", "49.9999"]);
        let accepted = request_amount(&mut amounts, btc(49.9999), ("Sender", "Receiver"));
        assert_eq!(accepted.unwrap(), btc(49.9999));
    }

    #[test]
    fn non_numeric_input_reprompts_without_crashing() {
        let mut amounts = ScriptedAmounts::new(["ten", "1,5", "0.5"]);
        let accepted = request_amount(&mut amounts, btc(1.0), ("X", "Y"));
        assert_eq!(accepted.unwrap(), btc(0.5));
    }

    #[test]
    fn negative_input_reprompts() {
        let mut amounts = ScriptedAmounts::new(["-3", "1"]);
        let accepted = request_amount(&mut amounts, btc(2.0), ("X", "Y"));
        assert_eq!(accepted.unwrap(), btc(1.0));
    }

    #[test]
    fn amount_equal_to_max_is_accepted() {
        let max = btc(49.9999);
        let mut amounts = ScriptedAmounts::new(["49.9999"]);
        let accepted = request_amount(&mut amounts, max, ("X", "Y"));
        assert_eq!(accepted.unwrap(), max);
    }

    #[test]
    fn exhausted_provider_is_an_error() {
        let mut amounts = ScriptedAmounts::new(Vec::<String>::new());
        let result = request_amount(&mut amounts, btc(1.0), ("X", "Y"));
        assert!(matches!(result, Err(TransferError::AmountInputClosed)));
    }

    #[test]
    fn invalid_entries_before_a_valid_one_are_all_consumed() {
        let mut amounts = ScriptedAmounts::new(["bogus", "0", "2", "1.25", "0.75"]);
        let accepted = request_amount(&mut amounts, btc(1.5), ("X", "Y"));
        assert_eq!(accepted.unwrap(), btc(1.25));
        // The trailing entry is left for the next prompt.
        assert_eq!(amounts.read_amount(""), Some("0.75".to_owned()));
    }
}
