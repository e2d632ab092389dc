//! Tests for shared object dependency resolution
//!
//! The dependency lister is swapped for `cat` over files holding canned
//! lister output, so these tests do not depend on the host libraries.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use appdir_runtime::{RuntimeError, SharedObjectDependenciesResolver};
use tempfile::tempdir;

fn cat_resolver() -> SharedObjectDependenciesResolver {
    SharedObjectDependenciesResolver::new().with_lister("cat")
}

fn listing(path: &Path, content: &str) -> PathBuf {
    fs::write(path, content).unwrap();
    path.to_path_buf()
}

#[test]
fn test_resolve_unions_listings() {
    let temp = tempdir().unwrap();
    let a = listing(
        &temp.path().join("a"),
        "\tlibx.so.1 => /opt/lib/libx.so.1 (0x00007f0000000000)\n\t/lib64/ld-linux-x86-64.so.2 (0x00007f0000001000)\n",
    );
    let b = listing(
        &temp.path().join("b"),
        "\tlibx.so.1 => /opt/lib/libx.so.1 (0x00007f0000000000)\n\tliby.so.2 => /opt/lib/liby.so.2 (0x00007f0000002000)\n\tlibz.so => not found\n",
    );

    let deps = cat_resolver().resolve(&[a, b]).unwrap();
    let expected: BTreeSet<PathBuf> = [
        "/opt/lib/libx.so.1",
        "/opt/lib/liby.so.2",
        "/lib64/ld-linux-x86-64.so.2",
    ]
    .iter()
    .map(PathBuf::from)
    .collect();
    assert_eq!(deps.resolved, expected);
    assert!(deps.duplicates.is_empty());
}

#[test]
fn test_duplicate_inputs_are_kept_out_of_resolved() {
    let temp = tempdir().unwrap();
    let a = listing(
        &temp.path().join("a"),
        "\tliby.so => /opt/lib/liby.so (0x1)\n",
    );
    let b = listing(
        &temp.path().join("b"),
        &format!("\tliba.so => {} (0x2)\n", a.display()),
    );

    let deps = cat_resolver()
        .resolve(&[a.clone(), b, a.clone()])
        .unwrap();

    assert_eq!(deps.duplicates, BTreeSet::from([a.clone()]));
    assert!(!deps.resolved.contains(&a));
    assert!(deps.resolved.contains(Path::new("/opt/lib/liby.so")));
}

#[test]
fn test_filter_linked_libraries() {
    let temp = tempdir().unwrap();
    let y = listing(&temp.path().join("liby.so"), "\x7fELF\n");
    let x = listing(
        &temp.path().join("libx.so"),
        &format!("\x7fELF\n\tliby.so => {} (0x1)\n", y.display()),
    );
    let text = listing(&temp.path().join("notes.txt"), "plain text\n");

    let include = BTreeSet::from([x.clone(), y, text.clone()]);
    let kept = cat_resolver().filter_linked_libraries(&include).unwrap();

    assert_eq!(kept, BTreeSet::from([x, text]));
}

#[test]
fn test_lister_failure_is_reported() {
    let resolver = SharedObjectDependenciesResolver::new().with_lister("/nonexistent/ldd");
    let result = resolver.resolve(&[PathBuf::from("/bin/sh")]);
    assert!(matches!(result, Err(RuntimeError::DependencyLister { .. })));
}

#[test]
fn test_lister_timeout() {
    let temp = tempdir().unwrap();
    let fifo = temp.path().join("pipe");
    // opening a FIFO without a writer blocks the lister
    let created = Command::new("mkfifo")
        .arg(&fifo)
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if !created {
        return;
    }

    let resolver = cat_resolver().with_timeout(Duration::from_millis(200));
    let result = resolver.list_dependencies(&fifo);
    assert!(matches!(result, Err(RuntimeError::DependencyLister { .. })));
}

#[test]
fn test_host_ldd() {
    let available = Command::new("ldd")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !available || !Path::new("/bin/sh").exists() {
        return;
    }

    let deps = SharedObjectDependenciesResolver::new()
        .resolve(&[PathBuf::from("/bin/sh")])
        .unwrap();
    assert!(deps.resolved.iter().all(|p| p.is_absolute()));
}
