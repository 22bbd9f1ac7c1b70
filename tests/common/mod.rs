use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;

/// Writes a JSON Lines operations file for the batch driver.
pub fn write_operations(path: &Path, operations: &[serde_json::Value]) -> Result<(), Error> {
    let mut file = File::create(path)?;
    for op in operations {
        writeln!(file, "{op}")?;
    }
    file.flush()?;
    Ok(())
}

/// A redemption-heavy fixture: `codes` control numbers, each redeemed and
/// confirmed through the manual rail.
pub fn write_settled_batch(path: &Path, codes: usize) -> Result<(), Error> {
    let mut operations = Vec::new();
    for i in 1..=codes {
        operations.push(serde_json::json!({
            "op": "generate",
            "merchant": "m-1",
            "amount": "1000",
        }));
        operations.push(serde_json::json!({
            "op": "redeem",
            "code": format!("@{i}"),
            "order_id": format!("ORDER-{i}"),
        }));
        operations.push(serde_json::json!({
            "op": "event",
            "provider": "manual",
            "order_id": format!("ORDER-{i}"),
            "status": "CONFIRMED",
        }));
    }
    write_operations(path, &operations)
}
