pub mod customer;
pub mod mapping;
pub mod response;
pub mod trigger;

/// Next `PREFIX_NNN` identifier after the highest numeric suffix among
/// `taken`. Identifiers that do not follow the scheme are ignored.
pub fn next_sequential_id<'a>(prefix: &str, taken: impl IntoIterator<Item = &'a str>) -> String {
    let highest = taken
        .into_iter()
        .filter_map(|id| id.strip_prefix(prefix)?.strip_prefix('_')?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{prefix}_{:03}", highest + 1)
}

#[cfg(test)]
mod tests {
    use super::next_sequential_id;

    #[test]
    fn sequential_ids_skip_past_highest_suffix() {
        assert_eq!(next_sequential_id("TRG", []), "TRG_001");
        assert_eq!(next_sequential_id("TRG", ["TRG_001", "TRG_007", "custom"]), "TRG_008");
        assert_eq!(next_sequential_id("RES", ["RES_999"]), "RES_1000");
    }
}
