//! End-to-end scenarios over package trees on disk.

use crate::*;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn write_file(file: &Path, content: &str) {
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(file, content).unwrap();
}

fn write_manifest(dir: &Path, manifest: serde_json::Value) {
    write_file(&dir.join("package.json"), &manifest.to_string());
}

/// ```text
/// app/                      deps: addon ^2, lib ^1   devDeps: tool
///   node_modules/addon/     2.3.1, deps: lib ^3
///     node_modules/lib/     3.0.0-beta.2 (nested)
///   node_modules/lib/       1.5.0 (hoisted)
///   node_modules/stranger/  0.1.0 (installed, not declared)
/// ```
fn setup_temp_app() -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let root = std::env::temp_dir()
        .join("buildmacros_tests")
        .join(format!("{}_{}", timestamp, id))
        .join("app");

    if root.exists() {
        fs::remove_dir_all(&root).ok();
    }
    fs::create_dir_all(root.join("src")).unwrap();

    write_manifest(
        &root,
        json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": {"addon": "^2.0.0", "lib": "^1.0.0"},
            "devDependencies": {"tool": "*"}
        }),
    );
    let addon = root.join("node_modules/addon");
    write_manifest(
        &addon,
        json!({"name": "addon", "version": "2.3.1", "dependencies": {"lib": "^3.0.0-0"}}),
    );
    write_manifest(
        &addon.join("node_modules/lib"),
        json!({"name": "lib", "version": "3.0.0-beta.2"}),
    );
    write_manifest(
        &root.join("node_modules/lib"),
        json!({"name": "lib", "version": "1.5.0"}),
    );
    write_manifest(
        &root.join("node_modules/stranger"),
        json!({"name": "stranger", "version": "0.1.0"}),
    );
    fs::canonicalize(&root).unwrap()
}

fn squash(s: &str) -> String {
    s.split_whitespace().collect()
}

fn expanded_file<'r>(report: &'r BuildReport, path: &str) -> &'r FileExpansion {
    report
        .files
        .iter()
        .find(|f| f.path == Path::new(path))
        .unwrap_or_else(|| panic!("{path} was not expanded"))
}

#[test]
fn test_condition_branches_eliminated() {
    let root = setup_temp_app();
    write_file(
        &root.join("src/lib.rs"),
        r#"
        use buildmacros::{dependency_satisfies, macro_condition};

        pub fn transport() -> &'static str {
            if macro_condition(dependency_satisfies("addon", "^2.0.0")) {
                "modern"
            } else {
                "legacy"
            }
        }

        pub fn extras() {
            if macro_condition(dependency_satisfies("lib", ">=2")) {
                lib_v2_only();
            }
            always();
        }
        "#,
    );

    let session = BuildSession::new();
    let report = session.expand_package(&root).unwrap();
    assert!(report.is_success(), "{:?}", report.diagnostics);

    let lib = expanded_file(&report, "src/lib.rs");
    let out = squash(&lib.source);
    assert!(out.contains("{{\"modern\"}}"));
    assert!(!out.contains("legacy"));
    assert!(!out.contains("lib_v2_only"));
    assert!(out.contains("always();"));
    assert!(!out.contains("buildmacros"));
    assert_eq!(lib.stats.branches_eliminated, 2);
    assert_eq!(lib.stats.count(MacroKind::DependencySatisfies), 2);
}

#[test]
fn test_nested_conditions() {
    let root = setup_temp_app();
    write_file(
        &root.join("src/lib.rs"),
        r#"
        use buildmacros::*;

        pub fn pick() -> u8 {
            if macro_condition(dependency_satisfies("addon", "2.x")) {
                if macro_condition(dependency_satisfies("lib", "^1.5.0")) {
                    if macro_condition(false) { 1 } else { 2 }
                } else {
                    3
                }
            } else {
                4
            }
        }
        "#,
    );

    let report = BuildSession::new().expand_package(&root).unwrap();
    let lib = expanded_file(&report, "src/lib.rs");
    assert_eq!(squash(&lib.source), "pubfnpick()->u8{{{{2}}}}");
    assert_eq!(lib.stats.branches_eliminated, 3);
}

#[test]
fn test_tree_without_macros_is_unchanged() {
    let root = setup_temp_app();
    let source = "pub fn each<T>(v: T) -> T { v }\npub fn run() { each(1); }\n";
    write_file(&root.join("src/lib.rs"), source);

    let report = BuildSession::new().expand_package(&root).unwrap();
    let lib = expanded_file(&report, "src/lib.rs");
    assert!(lib.is_unchanged());
    assert_eq!(lib.source, source);
}

#[test]
fn test_fail_build_reports_location_and_other_files_still_expand() {
    let root = setup_temp_app();
    write_file(
        &root.join("src/lib.rs"),
        "use buildmacros::fail_build;\n\npub fn check() {\n    fail_build(\"license check failed\");\n}\n",
    );
    write_file(
        &root.join("src/ok.rs"),
        "use buildmacros::each;\npub fn f() -> [u8; 2] { each([1, 2]) }\n",
    );

    let report = BuildSession::new().expand_package(&root).unwrap();
    assert!(!report.is_success());
    assert_eq!(report.diagnostics.len(), 1);

    let d = &report.diagnostics[0];
    assert_eq!(d.kind(), "user-build-failure");
    assert_eq!(d.message(), "license check failed");
    assert_eq!(d.file, Path::new("src/lib.rs"));
    assert_eq!((d.line, d.column), (4, 5));
    assert_eq!(
        d.to_string(),
        "src/lib.rs:4:5: error[user-build-failure]: license check failed"
    );
    assert!(matches!(
        report.first_error(),
        Some(MacroError::UserBuildFailure { .. })
    ));

    let ok = expanded_file(&report, "src/ok.rs");
    assert_eq!(ok.stats.count(MacroKind::Each), 1);
}

#[test]
fn test_own_config_ignores_foreign_contributions() {
    let root = setup_temp_app();
    let session = BuildSession::new();
    let app = session.identify(&root).unwrap();
    let addon = session.identify(&root.join("node_modules/addon")).unwrap();

    // A declares dev for itself, B pushes prod at A
    session
        .register(app.clone(), app.clone(), json!({"mode": "dev"}))
        .unwrap();
    session
        .register(addon.clone(), app.clone(), json!({"mode": "prod"}))
        .unwrap();

    assert_eq!(*session.own_config(&root).unwrap(), json!({"mode": "dev"}));
    assert_eq!(session.registry().foreign_contributions(&app).len(), 1);
}

#[test]
fn test_get_config_authorization_and_consistency() {
    let root = setup_temp_app();
    let session = BuildSession::new();
    let addon = session.identify(&root.join("node_modules/addon")).unwrap();
    let stranger = session.identify(&root.join("node_modules/stranger")).unwrap();
    session
        .register(addon.clone(), addon.clone(), json!({"theme": "dark", "size": 3}))
        .unwrap();
    session
        .register(stranger.clone(), stranger, json!({"secret": true}))
        .unwrap();

    write_file(
        &root.join("src/lib.rs"),
        r#"
        use buildmacros::get_config;
        pub fn a() { let c = get_config::<Cfg>("addon"); }
        pub fn b() { let c = get_config::<Cfg>("addon"); }
        "#,
    );
    write_file(
        &root.join("src/bad.rs"),
        r#"
        use buildmacros::get_config;
        pub fn c() { let c = get_config::<Cfg>("stranger"); }
        "#,
    );

    let report = session.expand_package(&root).unwrap();
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].kind(), "unauthorized-config-access");
    assert_eq!(report.diagnostics[0].file, Path::new("src/bad.rs"));

    // Both call sites see the same payload as the package itself
    let out = squash(&expanded_file(&report, "src/lib.rs").source);
    let literal = "::serde_json::json!({\"size\":3,\"theme\":\"dark\"})";
    assert_eq!(out.matches(literal).count(), 2, "{out}");
    assert_eq!(
        *session.registry().get_own_config(&addon).unwrap(),
        json!({"theme": "dark", "size": 3})
    );
}

#[test]
fn test_dependency_satisfies_is_referentially_transparent() {
    let root = setup_temp_app();
    for name in ["a", "b", "c"] {
        write_file(
            &root.join(format!("src/{name}.rs")),
            r#"use buildmacros::dependency_satisfies;
            pub fn f() -> bool { dependency_satisfies("lib", "^1.2.0") }"#,
        );
    }

    let session = BuildSession::new();
    let report = session.expand_package(&root).unwrap();
    assert!(report.is_success());
    for name in ["a", "b", "c"] {
        let file = expanded_file(&report, &format!("src/{name}.rs"));
        assert_eq!(squash(&file.source), "pubfnf()->bool{true}");
    }
    assert!(session.satisfies(&root, "lib", "^1.2.0").unwrap());
    assert_eq!(report.stats().count(MacroKind::DependencySatisfies), 3);
}

#[test]
fn test_nested_install_seen_from_addon() {
    let root = setup_temp_app();
    let addon_dir = root.join("node_modules/addon");
    write_file(
        &addon_dir.join("src/lib.rs"),
        r#"use buildmacros::dependency_satisfies;
        pub fn next() -> bool { dependency_satisfies("lib", "^3.0.0-alpha") }"#,
    );

    let session = BuildSession::new();
    let report = session.expand_package(&addon_dir).unwrap();
    let lib = expanded_file(&report, "src/lib.rs");
    assert_eq!(squash(&lib.source), "pubfnnext()->bool{true}");
    assert!(!session.satisfies(&root, "lib", "^3.0.0-alpha").unwrap());
}

#[test]
fn test_local_each_is_not_a_macro() {
    let root = setup_temp_app();
    write_file(
        &root.join("src/lib.rs"),
        r#"
        use buildmacros::*;
        fn each(v: u8) -> u8 { v + 1 }
        pub fn f() -> u8 { each(1) }
        "#,
    );

    let report = BuildSession::new().expand_package(&root).unwrap();
    let lib = expanded_file(&report, "src/lib.rs");
    assert!(lib.is_unchanged());
    assert!(squash(&lib.source).contains("each(1)"));
}

#[test]
fn test_non_static_argument_fails_build() {
    let root = setup_temp_app();
    write_file(
        &root.join("src/lib.rs"),
        r#"
        use buildmacros::dependency_satisfies;
        pub fn f(name: &str) -> bool { dependency_satisfies(name, "^1") }
        "#,
    );

    let report = BuildSession::new().expand_package(&root).unwrap();
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].kind(), "non-static-argument");
    assert!(report.files.is_empty());
}

#[test]
fn test_config_file_drives_registry_and_options() {
    let root = setup_temp_app();
    write_file(
        &root.join("buildmacros.toml"),
        r#"
        prune_imports = false
        merger = "deep"

        [[contribution]]
        origin = "."
        [contribution.payload.features]
        fast = true

        [[contribution]]
        origin = "."
        [contribution.payload.features]
        small = false

        [[contribution]]
        origin = "node_modules/addon"
        [contribution.payload]
        theme = "light"
        "#,
    );
    write_file(
        &root.join("src/lib.rs"),
        r#"use buildmacros::{get_own_config, macro_condition};
        pub fn f() { if macro_condition(get_own_config::<C>().features.fast) { fast(); } }"#,
    );

    let mut session = BuildSession::new();
    assert!(session.load_config(&root).unwrap());
    assert!(!session.options().prune_imports);
    assert_eq!(
        *session.own_config(&root).unwrap(),
        json!({"features": {"fast": true, "small": false}})
    );

    let report = session.expand_package(&root).unwrap();
    let out = squash(&expanded_file(&report, "src/lib.rs").source);
    assert!(out.contains("{fast();}"));
    // Imports kept when pruning is off
    assert!(out.contains("usebuildmacros"));
}

#[test]
fn test_registration_closes_once_expansion_starts() {
    let root = setup_temp_app();
    write_file(&root.join("src/lib.rs"), "pub fn f() {}");

    let session = BuildSession::new();
    session.expand_package(&root).unwrap();
    let app = session.identify(&root).unwrap();
    let err = session
        .register(app.clone(), app, json!({"late": true}))
        .unwrap_err();
    assert_eq!(err.kind(), "late-registration");
}

#[test]
fn test_write_to_output_dir() {
    let root = setup_temp_app();
    write_file(
        &root.join("src/api/mod.rs"),
        r#"use buildmacros::import_sync;
        pub fn load() { let m = import_sync::<M>("addon/widgets"); }"#,
    );

    let report = BuildSession::new().expand_package(&root).unwrap();
    let out_dir = root.join("target/expanded");
    assert_eq!(report.write_to(&out_dir).unwrap(), 1);
    let written = fs::read_to_string(out_dir.join("src/api/mod.rs")).unwrap();
    assert!(squash(&written).contains("letm=::addon::widgets;"));

    let summary = report.to_json();
    assert_eq!(summary["success"], true);
    assert_eq!(summary["stats"]["resolved"]["import_sync"], 1);
}

#[test]
fn test_parse_error_is_collected() {
    let root = setup_temp_app();
    write_file(&root.join("src/lib.rs"), "pub fn broken( {");

    let report = BuildSession::new().expand_package(&root).unwrap();
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].kind(), "parse");
    assert!(report.diagnostics[0].line >= 1);
}

#[test]
fn test_missing_package_is_error() {
    let root = setup_temp_app();
    let err = BuildSession::new()
        .expand_package(&root.join("src"))
        .unwrap_err();
    assert_eq!(err.kind(), "manifest");
}

#[test]
fn test_many_files_expand_in_parallel_and_untouched_files_keep_their_text() {
    let root = setup_temp_app();
    let mut untouched = Vec::new();
    for i in 0..12 {
        let path = root.join(format!("src/m{i}.rs"));
        if i % 2 == 0 {
            write_file(
                &path,
                "use buildmacros::dependency_satisfies;\n\
                 // rewritten\n\
                 pub fn f() -> bool { dependency_satisfies(\"addon\", \"^2\") }\n",
            );
        } else {
            let source = format!(
                "// SPDX-License-Identifier: MIT\n\npub fn f() {{\n    // keep me\n    g({i});\n}}\n"
            );
            write_file(&path, &source);
            untouched.push((format!("src/m{i}.rs"), source));
        }
    }

    let report = BuildSession::new().expand_package(&root).unwrap();
    assert!(report.is_success(), "{:?}", report.diagnostics);
    assert_eq!(report.files.len(), 12);
    assert_eq!(report.stats().count(MacroKind::DependencySatisfies), 6);

    let out_dir = root.join("target/expanded");
    assert_eq!(report.write_to(&out_dir).unwrap(), 12);
    for (path, source) in &untouched {
        assert!(expanded_file(&report, path).is_unchanged());
        assert_eq!(&fs::read_to_string(out_dir.join(path)).unwrap(), source);
    }
    let rewritten = fs::read_to_string(out_dir.join("src/m0.rs")).unwrap();
    assert_eq!(squash(&rewritten), "pubfnf()->bool{true}");
    syn::parse_file(&rewritten).unwrap();
}

#[test]
fn test_bad_config_entry_registers_nothing() {
    let root = setup_temp_app();
    write_file(
        &root.join("buildmacros.toml"),
        r#"
        prune_imports = false

        [[contribution]]
        origin = "."
        [contribution.payload]
        mode = "dev"

        [[contribution]]
        origin = "node_modules/missing"
        [contribution.payload]
        theme = "dark"
        "#,
    );

    let mut session = BuildSession::new();
    let err = session.load_config(&root).unwrap_err();
    assert!(format!("{err:#}").contains("node_modules/missing"), "{err:#}");
    assert!(session.registry().is_empty());
    assert!(session.options().prune_imports);
    assert_eq!(*session.own_config(&root).unwrap(), json!({}));
}
