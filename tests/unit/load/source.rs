use super::*;
use crate::foundation::error::ErrorKind;

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "svgaplay_source_{tag}_{}_{nanos}",
        std::process::id()
    ))
}

#[test]
fn parse_classifies_once() {
    assert_eq!(
        MovieSource::parse("https://cdn.example.com/a.svga"),
        MovieSource::Url("https://cdn.example.com/a.svga".to_string())
    );
    assert_eq!(
        MovieSource::parse("  HTTP://x/y.svga "),
        MovieSource::Url("HTTP://x/y.svga".to_string())
    );
    assert_eq!(
        MovieSource::parse("file:///android_asset/anim/gift.svga"),
        MovieSource::AssetPath("anim/gift.svga".to_string())
    );
    assert_eq!(
        MovieSource::parse("anim/gift.svga"),
        MovieSource::AssetPath("anim/gift.svga".to_string())
    );
    assert_eq!(
        MovieSource::parse("file:///tmp/a.svga"),
        MovieSource::FilePath(PathBuf::from("/tmp/a.svga"))
    );
    assert_eq!(
        MovieSource::parse("/tmp/a.svga"),
        MovieSource::FilePath(PathBuf::from("/tmp/a.svga"))
    );
}

#[test]
fn url_keys_ignore_scheme_and_host_case() {
    let a = ContentKey::for_source(&MovieSource::parse("https://CDN.Example.com/A.svga")).unwrap();
    let b = ContentKey::for_source(&MovieSource::parse("https://cdn.example.com/A.svga")).unwrap();
    let c = ContentKey::for_source(&MovieSource::parse("https://cdn.example.com/a.svga")).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.dir_name().len(), 32);
    assert_eq!(a.to_string(), a.dir_name());
}

#[test]
fn asset_keys_normalise_separators() {
    let a = ContentKey::for_source(&MovieSource::AssetPath("anim/./gift.svga".into())).unwrap();
    let b = ContentKey::for_source(&MovieSource::AssetPath("anim\\gift.svga".into())).unwrap();
    assert_eq!(a, b);

    let err = ContentKey::for_source(&MovieSource::AssetPath("../gift.svga".into())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
}

#[test]
fn different_kinds_never_share_a_key() {
    let asset = ContentKey::for_source(&MovieSource::AssetPath("a.svga".into())).unwrap();
    let raw = ContentKey::for_source(&MovieSource::raw("a.svga", b"a.svga".to_vec())).unwrap();
    assert_ne!(asset, raw);

    let raw2 = ContentKey::for_source(&MovieSource::raw("other-alias", b"a.svga".to_vec())).unwrap();
    assert_eq!(raw, raw2);
}

#[test]
fn fetcher_reads_files_and_assets() {
    let root = temp_dir("fetch");
    std::fs::create_dir_all(root.join("anim")).unwrap();
    std::fs::write(root.join("anim/a.svga"), b"payload").unwrap();
    std::fs::write(root.join("empty.svga"), b"").unwrap();

    let opts = LoaderOpts {
        asset_root: Some(root.clone()),
        ..LoaderOpts::default()
    };
    let fetcher = DefaultFetcher::new(&opts);
    let cancel = CancelToken::new();

    let asset = fetcher
        .fetch(&MovieSource::AssetPath("anim/a.svga".into()), &cancel)
        .unwrap();
    assert_eq!(asset, b"payload");

    let file = fetcher
        .fetch(&MovieSource::FilePath(root.join("anim/a.svga")), &cancel)
        .unwrap();
    assert_eq!(file, b"payload");

    let empty = fetcher
        .fetch(&MovieSource::AssetPath("empty.svga".into()), &cancel)
        .unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::Resource);

    let missing = fetcher
        .fetch(&MovieSource::FilePath(root.join("nope.svga")), &cancel)
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::Io);

    let escape = fetcher
        .fetch(&MovieSource::AssetPath("../etc/passwd".into()), &cancel)
        .unwrap_err();
    assert_eq!(escape.kind(), ErrorKind::Security);

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn fetcher_honours_cancellation() {
    let fetcher = DefaultFetcher::new(&LoaderOpts::default());
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = fetcher
        .fetch(&MovieSource::raw("x", vec![1, 2, 3]), &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}
