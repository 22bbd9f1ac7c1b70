use clap::Parser;
use malipo::application::gateway::Gateway;
use malipo::config::CoreConfig;
use malipo::domain::control_number::CodeSpec;
use malipo::domain::payment::PaymentStatus;
use malipo::domain::ports::SharedPaymentStore;
use malipo::domain::principal::Principal;
use malipo::infrastructure::in_memory::{
    InMemoryControlNumberStore, InMemoryPaymentStore, InMemoryServiceStore,
};
use malipo::infrastructure::manual_rail::ManualRail;
use malipo::interfaces::csv::report_writer::PaymentReportWriter;
use malipo::interfaces::jsonl::operation_reader::{Operation, OperationReader};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations file (JSON Lines)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn build(cli: &Cli) -> Result<(Gateway, SharedPaymentStore)> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = &cli.db_path {
        use malipo::infrastructure::rocksdb::RocksDbStore;
        let store = RocksDbStore::open(db_path).into_diagnostic()?;
        let payments: SharedPaymentStore = Arc::new(store.clone());
        let gateway = Gateway::new(
            Arc::new(store.clone()),
            payments.clone(),
            Arc::new(store),
            Arc::new(ManualRail::new()),
            CoreConfig::default(),
        );
        return Ok((gateway, payments));
    }

    let payments: SharedPaymentStore = Arc::new(InMemoryPaymentStore::new());
    let gateway = Gateway::new(
        Arc::new(InMemoryControlNumberStore::new()),
        payments.clone(),
        Arc::new(InMemoryServiceStore::new()),
        Arc::new(ManualRail::new()),
        CoreConfig::default(),
    );
    Ok((gateway, payments))
}

/// Codes are random at generation time, so a replay file cannot name them
/// up front. `@last` and `@N` (1-based) refer to codes issued earlier in the
/// same run.
fn resolve_code(issued: &[String], code: &str) -> Option<String> {
    match code {
        "@last" => issued.last().cloned(),
        _ => match code.strip_prefix('@') {
            Some(index) => index
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|n| issued.get(n).cloned()),
            None => Some(code.to_string()),
        },
    }
}

async fn run_operation(
    gateway: &Gateway,
    issued: &mut Vec<String>,
    op: Operation,
) -> malipo::error::Result<()> {
    match op {
        Operation::Generate {
            merchant,
            amount,
            currency,
            method,
            service,
            max_uses,
            reusable,
            expires_in_hours,
            valid_for_days,
        } => {
            let principal = Principal::api_key(&merchant);
            let spec = CodeSpec {
                amount,
                currency,
                method,
                customer: None,
                expires_in: expires_in_hours.map(chrono::Duration::hours),
                valid_for: valid_for_days.map(chrono::Duration::days),
                is_reusable: reusable,
                max_uses,
                service,
            };
            let cn = gateway.generate_control_number(&principal, spec).await?;
            issued.push(cn.code);
        }
        Operation::Validate {
            code,
            expected_amount,
        } => {
            let code = resolve_code(issued, &code).unwrap_or(code);
            let outcome = gateway
                .validate_control_number(&code, expected_amount)
                .await?;
            tracing::info!(code = %code, valid = outcome.is_valid(), "validated control number");
        }
        Operation::Redeem {
            code,
            order_id,
            redeemer,
        } => {
            let code = resolve_code(issued, &code).unwrap_or(code);
            let principal = Principal::api_key("batch-driver");
            gateway
                .redeem_control_number(&principal, &code, &order_id, redeemer)
                .await?;
        }
        Operation::Event(event) => {
            gateway.submit_external_event(event).await?;
        }
        Operation::Poll { order_id } => {
            gateway.poll_status(&order_id).await?;
        }
        Operation::Access { service_id } => {
            let result = gateway.check_service_access(&service_id).await?;
            tracing::info!(service_id = %service_id, granted = result.is_granted(), "access check");
        }
        Operation::Sweep => {
            gateway.run_sweeps().await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs to stderr; stdout carries the CSV report.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let (gateway, payment_store) = build(&cli)?;

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    let mut issued = Vec::new();
    for op_result in reader.operations() {
        match op_result {
            Ok(op) => {
                if let Err(e) = run_operation(&gateway, &mut issued, op).await {
                    eprintln!("Error applying operation: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {e}");
            }
        }
    }

    let mut payments = Vec::new();
    for status in [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
    ] {
        payments.extend(
            payment_store
                .find_by_status(status)
                .await
                .into_diagnostic()?,
        );
    }

    let stdout = io::stdout();
    let mut writer = PaymentReportWriter::new(stdout.lock());
    writer.write_payments(payments).into_diagnostic()?;

    Ok(())
}
