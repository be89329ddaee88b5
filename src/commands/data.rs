use std::io::Write;

use anyhow::Result;

use super::{print_raw, Context};
use crate::batch::{run_each, ExitStatus};
use crate::client::DataKind;
use crate::format::HeaderPolicy;

/// Print the user-, meta- or vendor-data of each config, unformatted.
pub async fn get<W: Write>(
    ctx: &Context,
    kind: DataKind,
    ids: &[String],
    headers: HeaderPolicy,
    out: &mut W,
) -> Result<ExitStatus> {
    let result = run_each(ids, |id| ctx.client.get_data(kind, id, ctx.secure)).await;
    for (id, _) in result.successes() {
        tracing::info!(id, "printing cloud-init {}", kind.as_str());
    }
    print_raw(out, &result, "id", headers)?;
    Ok(result.report(&format!("{} get", kind.as_str())))
}
