use crate::application::reconciliation::RawPaymentEvent;
use crate::domain::control_number::{PaymentMethod, RedeemerInfo};
use crate::domain::money::Currency;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};

/// One line of the batch driver's input.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Generate {
        merchant: String,
        amount: Decimal,
        currency: Option<Currency>,
        #[serde(default)]
        method: PaymentMethod,
        service: Option<String>,
        max_uses: Option<u32>,
        #[serde(default)]
        reusable: bool,
        expires_in_hours: Option<i64>,
        valid_for_days: Option<i64>,
    },
    Validate {
        code: String,
        expected_amount: Option<Decimal>,
    },
    Redeem {
        code: String,
        order_id: String,
        #[serde(default)]
        redeemer: RedeemerInfo,
    },
    Event(RawPaymentEvent),
    Poll {
        order_id: String,
    },
    Access {
        service_id: String,
    },
    Sweep,
}

/// Reads operations from a JSON Lines source.
///
/// Wraps any `Read` and provides an iterator over `Result<Operation>`,
/// skipping blank lines, so large files stream without loading into memory.
pub struct OperationReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    /// Returns an iterator that lazily reads and decodes operations.
    pub fn operations(self) -> impl Iterator<Item = Result<Operation>> {
        self.reader
            .lines()
            .map(|line| Ok(line?))
            .filter(|line: &Result<String>| match line {
                Ok(text) => !text.trim().is_empty(),
                Err(_) => true,
            })
            .map(|line| {
                let line = line?;
                Ok(serde_json::from_str(&line)?)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = concat!(
            r#"{"op":"generate","merchant":"m-1","amount":"5000","service":"premium"}"#,
            "\n\n",
            r#"{"op":"redeem","code":"994123","order_id":"ORDER-1"}"#,
            "\n",
            r#"{"op":"sweep"}"#,
            "\n",
        );
        let reader = OperationReader::new(data.as_bytes());
        let results: Vec<Result<Operation>> = reader.operations().collect();

        assert_eq!(results.len(), 3);
        match results[0].as_ref().unwrap() {
            Operation::Generate {
                merchant, amount, ..
            } => {
                assert_eq!(merchant, "m-1");
                assert_eq!(*amount, dec!(5000));
            }
            other => panic!("unexpected operation: {other:?}"),
        }
        assert!(matches!(results[2].as_ref().unwrap(), Operation::Sweep));
    }

    #[test]
    fn test_reader_decodes_event_payload() {
        let data = r#"{"op":"event","provider":"mpesa","order_id":"ORDER-1","status":"SUCCESS","message":null,"external_reference":"EXT-1","received_at":null}"#;
        let reader = OperationReader::new(data.as_bytes());
        let results: Vec<Result<Operation>> = reader.operations().collect();

        match results[0].as_ref().unwrap() {
            Operation::Event(event) => {
                assert_eq!(event.provider, "mpesa");
                assert_eq!(event.status, "SUCCESS");
            }
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "{\"op\":\"sweep\"}\nnot json\n";
        let reader = OperationReader::new(data.as_bytes());
        let results: Vec<Result<Operation>> = reader.operations().collect();

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
