//! Identifier generation

use crate::error::{AgreementError, Result};
use bech32::Bech32m;
use uuid7::uuid7;

pub const AGREEMENT_HRP: &str = "agr_";
pub const PROCESS_HRP: &str = "proc_";
pub const STEP_HRP: &str = "step_";
pub const TASK_HRP: &str = "task_";
pub const LINE_HRP: &str = "line_";
pub const ROUTE_HRP: &str = "route_";
pub const ROUTE_LINE_HRP: &str = "rline_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Fresh identifier for one of the crate's own entity prefixes.
pub(crate) fn new_id(hrp: &str) -> Result<String> {
    new_uuid_to_bech32(hrp).map_err(AgreementError::Identifier)
}
