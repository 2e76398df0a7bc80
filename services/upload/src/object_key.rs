use chrono::Utc;

/// Derive the object key an upload will be stored under.
///
/// Format: `{prefix}/{millis}-{sanitized_filename}`
///
/// The prefix is fixed by configuration and never derived from client input,
/// so no path traversal sequence in the filename can escape it. Two uploads of
/// the same filename within the same millisecond collide; the later PUT wins.
pub fn derive_key(prefix: &str, file_name: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    format!("{}/{}-{}", prefix, millis, sanitize_file_name(file_name))
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
///
/// Total over any input (including the empty string) and idempotent when
/// reapplied to its own output.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_passes_allowed_characters() {
        assert_eq!(sanitize_file_name("photo-01.png"), "photo-01.png");
        assert_eq!(sanitize_file_name("CV.2024.pdf"), "CV.2024.pdf");
    }

    #[test]
    fn test_sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize_file_name("a b/c?.png"), "a_b_c_.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("héllo wörld.jpg"), "h_llo_w_rld.jpg");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let once = sanitize_file_name("a b/c?.png");
        assert_eq!(sanitize_file_name(&once), once);
    }

    #[test]
    fn test_sanitize_empty_input() {
        assert_eq!(sanitize_file_name(""), "");
    }

    #[test]
    fn test_derive_key_shape() {
        let key = derive_key("uploads", "doc.png");

        let rest = key.strip_prefix("uploads/").expect("fixed prefix");
        let (millis, name) = rest.split_once('-').expect("millis-name separator");
        assert!(!millis.is_empty());
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(name, "doc.png");
    }

    #[test]
    fn test_derive_key_no_traversal_survives() {
        let key = derive_key("uploads", "../../../secret");
        // Dots are allowed characters, but no slash survives sanitization, so
        // the only separator in the key is the fixed prefix's.
        assert!(key.starts_with("uploads/"));
        assert_eq!(key.matches('/').count(), 1);
    }

    #[test]
    fn test_derive_key_empty_filename() {
        let key = derive_key("uploads", "");
        assert!(key.starts_with("uploads/"));
        assert!(key.ends_with('-'));
    }
}
