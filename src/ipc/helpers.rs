use super::error::err;
use super::types::Request;
use crate::config::{AssessmentConfig, CloPloMap};
use crate::grid::{GridInput, Workbook};
use crate::ingest::IngestOptions;
use crate::load::sha256_hex;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Optional `configs` / `cloPloMap` params shared by the ingest methods.
/// Absent and null both mean "not supplied"; anything else must deserialize
/// cleanly or the request is rejected.
pub fn parse_ingest_options(req: &Request) -> Result<IngestOptions, serde_json::Value> {
    let configs = match req.params.get("configs") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            serde_json::from_value::<Vec<AssessmentConfig>>(v.clone()).map_err(|e| {
                err(
                    &req.id,
                    "bad_params",
                    format!("params.configs: {e}"),
                    None,
                )
            })?,
        ),
    };
    let clo_plo = match req.params.get("cloPloMap") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(serde_json::from_value::<CloPloMap>(v.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("params.cloPloMap: {e}"),
                None,
            )
        })?),
    };
    Ok(IngestOptions { configs, clo_plo })
}

/// Inline workbook param: parse the JSON grid and fingerprint its
/// serialized form so repeated sends of the same grid are recognizable.
pub fn workbook_param(req: &Request) -> Result<(Workbook, String, String), serde_json::Value> {
    let Some(raw) = req.params.get("workbook") else {
        return Err(err(&req.id, "bad_params", "missing params.workbook", None));
    };
    let grid: GridInput = serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("params.workbook: {e}"),
            None,
        )
    })?;
    let canonical = serde_json::to_string(raw).unwrap_or_default();
    let sha256 = sha256_hex(canonical.as_bytes());
    let file_name = req
        .params
        .get("fileName")
        .and_then(|v| v.as_str())
        .unwrap_or("workbook.json")
        .to_string();
    Ok((Workbook::from(grid), file_name, sha256))
}
