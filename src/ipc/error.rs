use serde_json::json;
use tracing::warn;

use crate::error::IngestError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Map a file-scoped ingest failure onto the wire envelope, with variant
/// fields surfaced as structured details where a shell can use them.
pub fn ingest_err(id: &str, e: &IngestError) -> serde_json::Value {
    warn!(code = e.code(), "workbook rejected: {e}");
    err(id, e.code(), e.to_string(), ingest_details(e))
}

fn ingest_details(e: &IngestError) -> Option<serde_json::Value> {
    match e {
        IngestError::MissingSheet(keyword) => Some(json!({ "keyword": keyword })),
        IngestError::MissingHeader { sheet, keywords } => {
            Some(json!({ "sheet": sheet, "keywords": keywords }))
        }
        IngestError::FileTooLarge { actual, limit } => {
            Some(json!({ "actualBytes": actual, "limitBytes": limit }))
        }
        IngestError::SheetTooLarge {
            sheet,
            actual,
            limit,
        } => Some(json!({ "sheet": sheet, "actualRows": actual, "limitRows": limit })),
        _ => None,
    }
}
