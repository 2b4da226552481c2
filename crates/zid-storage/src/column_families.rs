//! Column family definitions.

/// Entity records: entity_id → Entity
pub const CF_ENTITIES: &str = "entities";

/// Alias records: alias_id → Alias
pub const CF_ALIASES: &str = "aliases";

/// Get all column family names
pub fn all_column_families() -> Vec<&'static str> {
    vec![CF_ENTITIES, CF_ALIASES]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicate_column_families() {
        let cfs = all_column_families();
        let mut unique = std::collections::HashSet::new();

        for cf in &cfs {
            assert!(unique.insert(cf), "Duplicate column family: {}", cf);
        }
    }
}
