//! Construction and configuration surface: path validation with its
//! exact messages, namespace and directive registration, `exists`.

use scythe::{DirectiveHandler, Scythe, ScytheError, Settings};

fn working() -> (Scythe, tempfile::TempDir) {
    let cache = tempfile::tempdir().unwrap();
    let scythe = Scythe::new(Settings::new("tests/views", cache.path())).unwrap();
    (scythe, cache)
}

#[test]
fn missing_views_path_is_reported() {
    let cache = tempfile::tempdir().unwrap();
    let err = Scythe::new(Settings::new("/definitely/not/here", cache.path())).unwrap_err();
    assert!(matches!(err, ScytheError::ViewsPathNotFound(_)));
    assert_eq!(
        err.to_string(),
        "renderer cannot find view path at '/definitely/not/here'"
    );
}

#[test]
fn missing_cache_path_is_reported() {
    let err = Scythe::new(Settings::new("tests/views", "/definitely/not/here")).unwrap_err();
    assert!(matches!(err, ScytheError::CachePathNotFound(_)));
    assert_eq!(
        err.to_string(),
        "renderer cannot find cache path at '/definitely/not/here'"
    );
}

#[test]
fn trailing_slashes_are_tolerated() {
    let cache = tempfile::tempdir().unwrap();
    let views = format!("{}/", "tests/views");
    let scythe = Scythe::new(Settings::new(views, cache.path())).unwrap();
    assert!(scythe.exists("hello").unwrap());
}

#[test]
fn missing_namespace_path_is_reported() {
    let cache = tempfile::tempdir().unwrap();
    let err = Scythe::new(
        Settings::new("tests/views", cache.path()).namespace("mail", "/definitely/not/here"),
    )
    .unwrap_err();
    assert!(matches!(err, ScytheError::NamespacePathNotFound(..)));
    assert_eq!(
        err.to_string(),
        "renderer cannot find namespace path at '/definitely/not/here'"
    );
}

#[test]
fn namespaces_are_listed() {
    let cache = tempfile::tempdir().unwrap();
    let mut scythe = Scythe::new(
        Settings::new("tests/views", cache.path()).namespace("muppets", "tests/namespaces/muppets"),
    )
    .unwrap();
    scythe.add_namespace("more", "tests/views").unwrap();
    let names: Vec<&str> = scythe.namespaces().iter().map(|(n, _)| *n).collect();
    assert_eq!(names, vec!["more", "muppets"]);
}

#[test]
fn directives_are_listed_without_at_sign() {
    let (mut scythe, _cache) = working();
    assert!(scythe.directives().is_empty());
    scythe.add_directive("@datetime", DirectiveHandler::Replace("now".into()));
    scythe.add_directive("shout", DirectiveHandler::Call(Box::new(|_| String::new())));
    assert_eq!(scythe.directives(), vec!["datetime", "shout"]);
}

#[test]
fn renderer_debug_output_names_the_paths() {
    let (scythe, _cache) = working();
    let repr = format!("{scythe:?}");
    assert!(repr.contains("Scythe"));
    assert!(repr.contains("views"));
}

#[test]
fn exists_checks_the_view_file() {
    let (scythe, _cache) = working();
    assert!(scythe.exists("hello").unwrap());
    assert!(scythe.exists("muppets/list").unwrap());
    assert!(!scythe.exists("nope").unwrap());
}

#[test]
fn exists_on_unknown_namespace_fails() {
    let (scythe, _cache) = working();
    let err = scythe.exists("nope::thing").unwrap_err();
    assert_eq!(err.to_string(), "namespace 'nope' is not defined");
}
