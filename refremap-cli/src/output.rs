use serde::Serialize;

/// Print `data` as JSON (if `json`) or call `display_fn` for human-readable output.
pub fn print_output<T: Serialize>(
    data: &T,
    json: bool,
    display_fn: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if json {
        let json = serde_json::to_string_pretty(data)?;
        println!("{json}");
    } else {
        display_fn(data);
    }
    Ok(())
}
