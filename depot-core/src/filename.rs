//! Download filename construction.

use crate::content::ContentEntry;

fn safe_name(name: &str) -> String {
    let mut out = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '.' {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Filename announced in a transfer header:
/// `<unique-id-hex>-<name>-<version>` with anything outside
/// `[A-Za-z0-9.]` collapsed to a single underscore.
pub fn safe_filename(entry: &ContentEntry) -> String {
    format!(
        "{}-{}-{}",
        entry.unique_id,
        safe_name(&entry.name),
        safe_name(&entry.version)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::tests::sample_entry;

    #[test]
    fn test_safe_name_collapses_runs() {
        assert_eq!(safe_name("Green  Valley!"), "Green_Valley");
        assert_eq!(safe_name("v1.2 (beta)"), "v1.2_beta");
        assert_eq!(safe_name("___"), "");
    }

    #[test]
    fn test_safe_name_strips_edges() {
        assert_eq!(safe_name(".hidden."), "hidden");
        assert_eq!(safe_name("!leading"), "leading");
    }

    #[test]
    fn test_safe_filename() {
        let mut entry = sample_entry();
        entry.name = "Total Town Set".to_string();
        entry.version = "2.0".to_string();
        assert_eq!(safe_filename(&entry), "4f474658-Total_Town_Set-2.0");
    }
}
