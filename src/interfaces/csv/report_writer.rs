use crate::domain::payment::Payment;
use crate::error::Result;
use std::io::Write;

/// Writes the final payment table as CSV.
///
/// One row per payment: order id, status, amount, currency, external
/// reference, history length. Rows are sorted by order id so output is
/// stable across runs.
pub struct PaymentReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments(&mut self, mut payments: Vec<Payment>) -> Result<()> {
        payments.sort_by(|a, b| a.order_id.cmp(&b.order_id));

        self.writer.write_record([
            "order_id",
            "status",
            "amount",
            "currency",
            "external_reference",
            "history",
        ])?;
        for payment in payments {
            let amount = payment.amount.to_string();
            let history = payment.history.len().to_string();
            self.writer.write_record([
                payment.order_id.as_str(),
                payment.status.as_str(),
                amount.as_str(),
                payment.currency.as_str(),
                payment.external_reference.as_deref().unwrap_or(""),
                history.as_str(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
