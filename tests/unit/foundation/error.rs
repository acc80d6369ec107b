use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(SvgaError::decode("x").to_string().contains("decode error:"));
    assert!(
        SvgaError::security("x")
            .to_string()
            .contains("security error:")
    );
    assert!(SvgaError::io("x").to_string().contains("io error:"));
    assert!(
        SvgaError::resource("x")
            .to_string()
            .contains("resource error:")
    );
    assert!(
        SvgaError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert_eq!(SvgaError::Cancelled.to_string(), "cancelled");
}

#[test]
fn kind_follows_variant() {
    assert_eq!(SvgaError::decode("x").kind(), ErrorKind::Decode);
    assert_eq!(SvgaError::security("x").kind(), ErrorKind::Security);
    assert_eq!(SvgaError::io("x").kind(), ErrorKind::Io);
    assert_eq!(SvgaError::Cancelled.kind(), ErrorKind::Cancelled);
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = SvgaError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
    assert_eq!(err.kind(), ErrorKind::Other);
}
