/// Generate a new random identifier for an alert or HTTP monitor.
///
/// Identifiers are six random bytes, URL-safe base64 encoded without padding.
/// They never begin with `-`, so they can be passed as command-line arguments.
pub fn new_id() -> String {
    loop {
        let bytes: [u8; 6] = rand::random();
        let id = base64::encode_config(bytes, base64::URL_SAFE_NO_PAD);

        if !id.starts_with('-') {
            return id;
        }
    }
}

#[cfg(test)]
mod test {
    use super::new_id;

    #[test]
    fn test_id_shape() {
        for _ in 0..1000 {
            let id = new_id();
            assert_eq!(id.len(), 8, "{id}");
            assert!(!id.starts_with('-'), "{id}");
            assert!(
                id.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "{id}"
            );
        }
        assert_ne!(new_id(), new_id());
    }
}
