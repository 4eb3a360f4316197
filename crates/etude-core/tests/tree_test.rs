use std::sync::Arc;

use etude_core::{ConfigError, Handler, Method, PathTree, Resolution, handler};

fn tagged(tag: &'static str) -> Handler {
    handler(move |ctx| ctx.text(200, tag))
}

fn target_is(resolution: &Resolution<'_>, expected: &Handler) -> bool {
    resolution
        .target()
        .is_some_and(|t| Arc::ptr_eq(&t.handler, expected))
}

#[test]
fn find_returns_registered_handler() {
    let mut tree = PathTree::new();
    let users = tagged("users");
    let user = tagged("user");
    tree.add(Method::Get, "/users", Arc::clone(&users), vec![]).unwrap();
    tree.add(Method::Get, "/users/:id", Arc::clone(&user), vec![]).unwrap();

    let (res, params) = tree.find(Method::Get, "/users");
    assert!(target_is(&res, &users));
    assert!(params.is_empty());

    let (res, params) = tree.find(Method::Get, "/users/42");
    assert!(target_is(&res, &user));
    assert_eq!(params.get("id"), Some("42"));
}

#[test]
fn static_beats_param() {
    let mut tree = PathTree::new();
    let new = tagged("new");
    let by_id = tagged("by_id");
    // Registration order must not matter.
    tree.add(Method::Get, "/users/:id", Arc::clone(&by_id), vec![]).unwrap();
    tree.add(Method::Get, "/users/new", Arc::clone(&new), vec![]).unwrap();

    let (res, params) = tree.find(Method::Get, "/users/new");
    assert!(target_is(&res, &new));
    assert!(params.is_empty());

    let (res, params) = tree.find(Method::Get, "/users/7");
    assert!(target_is(&res, &by_id));
    assert_eq!(params.get("id"), Some("7"));
}

#[test]
fn param_beats_catch_all() {
    let mut tree = PathTree::new();
    let one = tagged("one");
    let rest = tagged("rest");
    tree.add(Method::Get, "/files/*path", Arc::clone(&rest), vec![]).unwrap();
    tree.add(Method::Get, "/files/:name", Arc::clone(&one), vec![]).unwrap();

    let (res, params) = tree.find(Method::Get, "/files/a.txt");
    assert!(target_is(&res, &one));
    assert_eq!(params.get("name"), Some("a.txt"));

    let (res, params) = tree.find(Method::Get, "/files/a/b.txt");
    assert!(target_is(&res, &rest));
    assert_eq!(params.get("path"), Some("a/b.txt"));
    assert_eq!(params.get("name"), None);
}

#[test]
fn catch_all_captures_remainder() {
    let mut tree = PathTree::new();
    tree.add(Method::Get, "/static/*filepath", tagged("static"), vec![])
        .unwrap();

    let (res, params) = tree.find(Method::Get, "/static/css/app.css");
    assert!(res.target().is_some());
    assert_eq!(params.get("filepath"), Some("css/app.css"));

    let (res, _) = tree.find(Method::Get, "/static");
    assert!(res.is_not_found());
}

#[test]
fn duplicate_route_rejected() {
    let mut tree = PathTree::new();
    tree.add(Method::Get, "/a/:id", tagged("first"), vec![]).unwrap();
    let err = tree
        .add(Method::Get, "/a/:id/", tagged("second"), vec![])
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::DuplicateRoute {
            method: Method::Get,
            path: "/a/:id".into()
        }
    );
    assert_eq!(tree.len(), 1);

    // Same path under another method is fine.
    tree.add(Method::Post, "/a/:id", tagged("post"), vec![]).unwrap();
    assert_eq!(tree.len(), 2);
}

#[test]
fn trailing_slash_and_root() {
    let mut tree = PathTree::new();
    let root = tagged("root");
    tree.add(Method::Get, "/", Arc::clone(&root), vec![]).unwrap();
    tree.add(Method::Get, "/users", tagged("users"), vec![]).unwrap();

    assert!(target_is(&tree.find(Method::Get, "/").0, &root));
    assert!(tree.find(Method::Get, "/users/").0.target().is_some());
    assert!(tree.find(Method::Get, "/users").0.target().is_some());
}

#[test]
fn method_mismatch_reports_allowed() {
    let mut tree = PathTree::new();
    tree.add(Method::Get, "/ping", tagged("ping"), vec![]).unwrap();

    let (res, _) = tree.find(Method::Post, "/ping");
    assert!(res.is_method_not_allowed());
    assert_eq!(res.allowed(), vec![Method::Get]);
}

#[test]
fn method_mismatch_keeps_captures() {
    let mut tree = PathTree::new();
    tree.add(Method::Get, "/users/:id", tagged("user"), vec![]).unwrap();

    let (res, params) = tree.find(Method::Post, "/users/5");
    assert!(res.is_method_not_allowed());
    assert_eq!(res.allowed(), vec![Method::Get]);
    assert_eq!(params.get("id"), Some("5"));
}

#[test]
fn not_found_after_partial_bind_has_no_captures() {
    let mut tree = PathTree::new();
    tree.add(Method::Get, "/users/:id/posts", tagged("posts"), vec![])
        .unwrap();

    let (res, params) = tree.find(Method::Get, "/users/5/x");
    assert!(res.is_not_found());
    assert!(res.allowed().is_empty());
    assert!(params.is_empty());
}

#[test]
fn invalid_patterns_leave_tree_unchanged() {
    let mut tree = PathTree::new();
    tree.add(Method::Get, "/ok", tagged("ok"), vec![]).unwrap();
    let before = tree.routes();

    assert!(matches!(
        tree.add(Method::Get, "missing", tagged("x"), vec![]),
        Err(ConfigError::MissingLeadingSlash(_))
    ));
    assert!(matches!(
        tree.add(Method::Get, "/a/*rest/b", tagged("x"), vec![]),
        Err(ConfigError::CatchAllNotTerminal { .. })
    ));
    assert!(matches!(
        tree.add(Method::Get, "/a/:/b", tagged("x"), vec![]),
        Err(ConfigError::EmptyCaptureName { .. })
    ));
    assert!(matches!(
        tree.add(Method::Get, "/a/:id/:id", tagged("x"), vec![]),
        Err(ConfigError::DuplicateCapture { .. })
    ));

    assert_eq!(tree.routes(), before);
    assert_eq!(tree.len(), 1);
}

#[test]
fn concurrent_find_is_consistent() {
    let mut tree = PathTree::new();
    for i in 0..50 {
        tree.add(Method::Get, &format!("/r{i}/:id"), tagged("r"), vec![])
            .unwrap();
    }
    let tree = &tree;

    std::thread::scope(|s| {
        for t in 0..8 {
            s.spawn(move || {
                for i in 0..50 {
                    let path = format!("/r{i}/{t}");
                    let (res, params) = tree.find(Method::Get, &path);
                    assert!(res.target().is_some());
                    assert_eq!(params.get("id"), Some(t.to_string().as_str()));
                }
            });
        }
    });
}
