//! Destination-specific header workarounds.

use bluepush_protocol::HeaderSet;
use tracing::info;

/// Polaroid PoGo printers reject object names containing more than one dot.
const POLAROID_POGO_OUI: &str = "00:04:48";

/// Applies peer-specific workarounds to the outgoing request headers.
///
/// Currently: Polaroid PoGo rejects filenames with more than one '.', so
/// every dot except the last becomes '_' ("a.b.jpg" becomes "a_b.jpg";
/// "abc.jpg" is unchanged).
pub fn apply_destination_quirks(request: &mut HeaderSet, destination: &str, filename: &str) {
    if destination.starts_with(POLAROID_POGO_OUI) {
        if let Some(renamed) = sanitize_multi_dot(filename) {
            info!(
                original = %filename,
                renamed = %renamed,
                "renaming file to work around Polaroid PoGo filename quirk"
            );
            request.set_name(renamed);
        }
    }
}

/// Replaces all but the last '.' with '_'. Returns `None` if unchanged.
fn sanitize_multi_dot(filename: &str) -> Option<String> {
    let mut chars: Vec<char> = filename.chars().collect();
    let mut first_dot = true;
    let mut modified = false;
    for c in chars.iter_mut().rev() {
        if *c == '.' {
            if !first_dot {
                *c = '_';
                modified = true;
            }
            first_dot = false;
        }
    }
    modified.then(|| chars.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_dot_unchanged() {
        assert_eq!(sanitize_multi_dot("abc.jpg"), None);
        assert_eq!(sanitize_multi_dot("nodots"), None);
    }

    #[test]
    fn extra_dots_replaced() {
        assert_eq!(sanitize_multi_dot("a.b.jpg"), Some("a_b.jpg".into()));
        assert_eq!(sanitize_multi_dot("a.b.c.jpg"), Some("a_b_c.jpg".into()));
        assert_eq!(sanitize_multi_dot("..x"), Some("_.x".into()));
    }

    #[test]
    fn quirk_applies_only_to_matching_destination() {
        let mut headers = HeaderSet::new();
        headers.set_name("a.b.jpg");

        apply_destination_quirks(&mut headers, "AA:BB:CC:DD:EE:FF", "a.b.jpg");
        assert_eq!(headers.name(), Some("a.b.jpg"));

        apply_destination_quirks(&mut headers, "00:04:48:11:22:33", "a.b.jpg");
        assert_eq!(headers.name(), Some("a_b.jpg"));
    }

    #[test]
    fn quirk_leaves_clean_names_alone() {
        let mut headers = HeaderSet::new();
        headers.set_name("photo.jpg");
        apply_destination_quirks(&mut headers, "00:04:48:11:22:33", "photo.jpg");
        assert_eq!(headers.name(), Some("photo.jpg"));
    }
}
