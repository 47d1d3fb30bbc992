pub mod orphan;
pub mod start;
pub mod status;
pub mod stop;

use std::fmt::Display;

use serde::Serialize;

/// Print `value` as pretty JSON or with its `Display` form.
pub fn emit<T: Serialize + Display>(value: &T, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{value}");
    }
    Ok(())
}
